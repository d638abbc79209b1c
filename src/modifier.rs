use crate::{argv::ArgVec, lexer::Operator};

/// パイプライン全体に掛かる修飾子。
///
/// バックグラウンド実行とリダイレクトはパイプライン全体に対して指定され、
/// 入力は最初の段、出力は最後の段に適用される。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifier {
    pub background: bool,       // & が指定された
    pub input: Option<String>,  // < のファイル名
    pub output: Option<String>, // > または >> のファイル名
    pub append: bool,           // >> なら真
}

/// 検査済みの引数ベクタから修飾子を取り出す。
///
/// 演算子とそのファイル名は引数ベクタから取り除かれる。
pub fn extract(argv: &mut ArgVec) -> Modifier {
    let mut modifier = Modifier::default();

    if let Some(p) = argv.position(Operator::Background) {
        argv.remove(p);
        modifier.background = true;
    }

    modifier.input = take_redirect(argv, Operator::RedirectIn);

    modifier.output = take_redirect(argv, Operator::RedirectOut);
    if modifier.output.is_none() {
        modifier.output = take_redirect(argv, Operator::RedirectAppend);
        modifier.append = modifier.output.is_some();
    }

    modifier
}

/// 演算子とその直後のファイル名を取り除き、ファイル名を返す
fn take_redirect(argv: &mut ArgVec, op: Operator) -> Option<String> {
    let p = argv.position(op)?;
    argv.remove(p); // 演算子
    if p < argv.argc() {
        argv.remove(p).unquoted() // ファイル名
    } else {
        None
    }
}
