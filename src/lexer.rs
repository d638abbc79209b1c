//! 1行を単語列に分割する字句解析器。
//!
//! 演算子は字句解析の段階で一度だけ識別され、以降は[`Word::Operator`]として扱われる。
//! そのため、クォートされた`"|"`はリテラルのままとなり、ファイル名として使える。

use std::{fmt, str::FromStr};

/// 予約された演算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Background,     // &
    Pipe,           // |
    RedirectIn,     // <
    RedirectOut,    // >
    RedirectAppend, // >>
}

impl Operator {
    /// すべての演算子
    pub const ALL: [Operator; 5] = [
        Operator::RedirectAppend,
        Operator::RedirectOut,
        Operator::RedirectIn,
        Operator::Background,
        Operator::Pipe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Background => "&",
            Operator::Pipe => "|",
            Operator::RedirectIn => "<",
            Operator::RedirectOut => ">",
            Operator::RedirectAppend => ">>",
        }
    }

    /// リダイレクト演算子なら真
    pub fn is_redirect(self) -> bool {
        matches!(
            self,
            Operator::RedirectIn | Operator::RedirectOut | Operator::RedirectAppend
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 設定に未知の演算子が書かれていた
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperator(pub String);

impl fmt::Display for UnknownOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知の演算子: {:?}", self.0)
    }
}

impl std::error::Error for UnknownOperator {}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_string()))
    }
}

/// 字句解析の結果となる単語
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    Literal(String), // 入力そのまま。クォート文字も含む
    Operator(Operator),
}

impl Word {
    pub fn literal(s: &str) -> Self {
        Word::Literal(s.to_string())
    }

    pub fn as_operator(&self) -> Option<Operator> {
        match self {
            Word::Operator(op) => Some(*op),
            Word::Literal(_) => None,
        }
    }

    pub fn is_operator(&self, op: Operator) -> bool {
        self.as_operator() == Some(op)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Word::Literal(s) => Some(s),
            Word::Operator(_) => None,
        }
    }

    /// クォート文字を取り除いたリテラルの値。演算子の場合はNone
    pub fn unquoted(&self) -> Option<String> {
        self.as_literal().map(|s| s.chars().filter(|c| *c != '"').collect())
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Literal(s) => f.write_str(s),
            Word::Operator(op) => f.write_str(op.as_str()),
        }
    }
}

/// 区切りとして認識する演算子の集合。空白は常に区切り。
///
/// 長い演算子から順に照合するので、`>>`が`>`と`>`に分かれることはない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSet {
    ops: Vec<Operator>,
}

impl OperatorSet {
    pub fn new<I>(ops: I) -> Self
    where
        I: IntoIterator<Item = Operator>,
    {
        let mut v: Vec<Operator> = Vec::new();
        for op in ops {
            if !v.contains(&op) {
                v.push(op);
            }
        }
        v.sort_by_key(|op| std::cmp::Reverse(op.as_str().len())); // 安定ソート
        OperatorSet { ops: v }
    }

    /// 空白のみで分割する
    pub fn whitespace_only() -> Self {
        OperatorSet { ops: Vec::new() }
    }

    /// 設定ファイルの文字列から生成
    pub fn from_strs<S: AsRef<str>>(strs: &[S]) -> Result<Self, UnknownOperator> {
        let ops = strs
            .iter()
            .map(|s| s.as_ref().parse::<Operator>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OperatorSet::new(ops))
    }

    pub fn contains(&self, op: Operator) -> bool {
        self.ops.contains(&op)
    }

    /// restの先頭が演算子ならそれを返す
    fn match_at(&self, rest: &str) -> Option<Operator> {
        self.ops.iter().copied().find(|op| rest.starts_with(op.as_str()))
    }
}

impl Default for OperatorSet {
    fn default() -> Self {
        OperatorSet::new(Operator::ALL)
    }
}

/// 字句解析エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnbalancedQuotes,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnbalancedQuotes => f.write_str("クォートが閉じられていません"),
        }
    }
}

impl std::error::Error for LexError {}

/// 1行を単語列に分割。
///
/// クォートの外では空白と演算子が区切りになる。`"`は単語にそのまま残り、
/// クォートが閉じていない場合は結果をすべて捨ててエラーを返す。
pub fn tokenize(line: &str, operators: &OperatorSet) -> Result<Vec<Word>, LexError> {
    let mut words = Vec::new();
    let mut current = String::new(); // 読み込み中の単語
    let mut quoted = false;
    let mut chars = line.char_indices();

    while let Some((i, c)) = chars.next() {
        if !quoted {
            if c.is_whitespace() {
                if !current.is_empty() {
                    words.push(Word::Literal(std::mem::take(&mut current)));
                }
                continue;
            }

            if let Some(op) = operators.match_at(&line[i..]) {
                if !current.is_empty() {
                    words.push(Word::Literal(std::mem::take(&mut current)));
                }
                words.push(Word::Operator(op));

                // 2文字以上の演算子は残りを読み飛ばす
                for _ in 1..op.as_str().len() {
                    chars.next();
                }
                continue;
            }
        }

        if c == '"' {
            quoted = !quoted;
        }
        current.push(c);
    }

    if quoted {
        return Err(LexError::UnbalancedQuotes);
    }

    if !current.is_empty() {
        words.push(Word::Literal(current));
    }

    Ok(words)
}
