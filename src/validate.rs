//! 実行前の構文チェック。引数ベクタは変更しない。

use crate::{
    argv::ArgVec,
    lexer::{Operator, Word},
};
use std::fmt;

/// 構文エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    BackgroundPosition,           // & が末尾以外、または & のみ
    MixedRedirect,                // > と >> が混在
    DuplicateRedirect(Operator),  // 同じリダイレクトが2回以上
    RedirectPosition(Operator),   // リダイレクトの位置が不正
    BadFilename(Operator),        // ファイル名が空、または演算子
    EmptyCommand,                 // パイプラインの段が空
    UnexpectedOperator(Operator), // 段の中に演算子が残っている
    CdArity,                      // cdの引数が1つでない
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::BackgroundPosition => f.write_str("'&'の位置が不正です"),
            SyntaxError::MixedRedirect => f.write_str("'>'と'>>'が混在しています"),
            SyntaxError::DuplicateRedirect(op) => write!(f, "リダイレクト'{op}'が重複しています"),
            SyntaxError::RedirectPosition(op) => write!(f, "リダイレクト'{op}'の位置が不正です"),
            SyntaxError::BadFilename(op) => write!(f, "'{op}'のファイル名が空か演算子です"),
            SyntaxError::EmptyCommand => f.write_str("空のコマンド"),
            SyntaxError::UnexpectedOperator(op) => write!(f, "予期しない演算子'{op}'"),
            SyntaxError::CdArity => f.write_str("usage: cd ディレクトリ"),
        }
    }
}

impl std::error::Error for SyntaxError {}

/// 検査順のリダイレクト演算子
const REDIRECTS: [Operator; 3] = [
    Operator::RedirectOut,
    Operator::RedirectIn,
    Operator::RedirectAppend,
];

/// パイプラインに分割する前の引数ベクタ全体を検査
pub fn validate(argv: &ArgVec) -> Result<(), SyntaxError> {
    let argc = argv.argc();

    // & は末尾のみ
    let background = match argv.position(Operator::Background) {
        Some(p) if p != argc - 1 || argc == 1 => return Err(SyntaxError::BackgroundPosition),
        Some(_) => true,
        None => false,
    };

    if argv.position(Operator::RedirectOut).is_some()
        && argv.position(Operator::RedirectAppend).is_some()
    {
        return Err(SyntaxError::MixedRedirect);
    }

    let end = argc - background as usize; // & を除いた末尾
    for op in REDIRECTS {
        if argv.count(op) > 1 {
            return Err(SyntaxError::DuplicateRedirect(op));
        }

        let Some(p) = argv.position(op) else {
            continue;
        };

        // (演算子, ファイル名)の組の後ろは終端か別のリダイレクト
        let chained = p + 2 < end
            && argv
                .get(p + 2)
                .and_then(Word::as_operator)
                .is_some_and(|next| next.is_redirect() && next != op);
        if p == 0 || !(p + 2 == end || chained) {
            return Err(SyntaxError::RedirectPosition(op));
        }

        let filename = argv.get(p + 1).and_then(Word::unquoted);
        if filename.as_deref().is_none_or(str::is_empty) {
            return Err(SyntaxError::BadFilename(op));
        }
    }

    Ok(())
}

/// パイプラインの段ごとの検査
pub fn validate_stage(stage: &[Word]) -> Result<(), SyntaxError> {
    let Some(first) = stage.first() else {
        return Err(SyntaxError::EmptyCommand);
    };

    if let Some(op) = stage.iter().find_map(Word::as_operator) {
        return Err(SyntaxError::UnexpectedOperator(op));
    }

    if first.unquoted().as_deref() == Some("cd") && stage.len() != 2 {
        return Err(SyntaxError::CdArity);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{tokenize, OperatorSet};

    fn check(line: &str) -> Result<(), SyntaxError> {
        validate(&ArgVec::from(tokenize(line, &OperatorSet::default()).unwrap()))
    }

    fn check_stage(line: &str) -> Result<(), SyntaxError> {
        validate_stage(&tokenize(line, &OperatorSet::whitespace_only()).unwrap())
    }

    #[test]
    fn accepts_common_lines() {
        assert_eq!(check("ls -la | wc -l > out.txt"), Ok(()));
        assert_eq!(check("cmd &"), Ok(()));
        assert_eq!(check("cd .."), Ok(()));
        assert_eq!(check("echo hi > out.txt"), Ok(()));
        assert_eq!(check("cat file | grep foo | wc -l &"), Ok(()));
        assert_eq!(check("sort < in > out"), Ok(()));
        assert_eq!(check("sort > out < in &"), Ok(()));
        assert_eq!(check("echo a >> log"), Ok(()));
    }

    #[test]
    fn background_must_be_last() {
        assert_eq!(check("ls & -l"), Err(SyntaxError::BackgroundPosition));
        assert_eq!(check("&"), Err(SyntaxError::BackgroundPosition));
        assert_eq!(check("ls & &"), Err(SyntaxError::BackgroundPosition));
    }

    #[test]
    fn truncate_and_append_conflict() {
        assert_eq!(check("ls > a >> b"), Err(SyntaxError::MixedRedirect));
    }

    #[test]
    fn duplicate_redirect() {
        assert_eq!(check("ls > >"), Err(SyntaxError::DuplicateRedirect(Operator::RedirectOut)));
        assert_eq!(
            check("cat < a < b"),
            Err(SyntaxError::DuplicateRedirect(Operator::RedirectIn))
        );
    }

    #[test]
    fn redirect_position() {
        assert_eq!(check("> out ls"), Err(SyntaxError::RedirectPosition(Operator::RedirectOut)));
        assert_eq!(check("ls >"), Err(SyntaxError::RedirectPosition(Operator::RedirectOut)));
        assert_eq!(check("ls > a b"), Err(SyntaxError::RedirectPosition(Operator::RedirectOut)));
        assert_eq!(
            check("cat < in | wc"),
            Err(SyntaxError::RedirectPosition(Operator::RedirectIn))
        );
        assert_eq!(check("ls > &"), Err(SyntaxError::RedirectPosition(Operator::RedirectOut)));
    }

    #[test]
    fn filename_must_be_literal() {
        assert_eq!(check("ls > |"), Err(SyntaxError::BadFilename(Operator::RedirectOut)));
        assert_eq!(check("ls > \"\""), Err(SyntaxError::BadFilename(Operator::RedirectOut)));
        assert_eq!(check("ls > \"|\""), Ok(()));
    }

    #[test]
    fn stage_checks() {
        assert_eq!(validate_stage(&[]), Err(SyntaxError::EmptyCommand));
        assert_eq!(check_stage("cd a b"), Err(SyntaxError::CdArity));
        assert_eq!(check_stage("cd"), Err(SyntaxError::CdArity));
        assert_eq!(check_stage("cd .."), Ok(()));
        assert_eq!(check_stage("echo cd a b"), Ok(()));
        assert_eq!(
            validate_stage(&[Word::literal("ls"), Word::Operator(Operator::Pipe)]),
            Err(SyntaxError::UnexpectedOperator(Operator::Pipe))
        );
    }
}
