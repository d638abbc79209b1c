use crate::{
    argv::ArgVec,
    lexer::{self, LexError, OperatorSet},
    modifier::{self, Modifier},
    pipeline::{self, Pipeline},
    validate::{self, SyntaxError},
};
use log::debug;
use std::fmt;

/// パース済みのコマンドライン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub pipeline: Pipeline,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Lex(LexError),
    Syntax(SyntaxError),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(e) => write!(f, "{e}"),
            ParseError::Syntax(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Lex(e) => Some(e),
            ParseError::Syntax(e) => Some(e),
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::Lex(e)
    }
}

impl From<SyntaxError> for ParseError {
    fn from(e: SyntaxError) -> Self {
        ParseError::Syntax(e)
    }
}

/// 1行をパースしてパイプラインと修飾子に分ける。
///
/// 字句解析 → 引数ベクタ → 構文チェック → 修飾子の抽出 → パイプで分割 → 段ごとのチェック
/// の順に行う。どこかで失敗した場合は何も実行されない。
pub fn parse(line: &str, operators: &OperatorSet) -> Result<CommandLine, ParseError> {
    let words = lexer::tokenize(line, operators)?;
    debug!("tokens: {words:?}");

    let mut argv = ArgVec::from(words);
    validate::validate(&argv)?;

    let modifier = modifier::extract(&mut argv);
    let pipeline = pipeline::split(argv);
    for stage in pipeline.stages() {
        validate::validate_stage(stage)?;
    }
    debug!("stages: {pipeline}, modifier: {modifier:?}");

    Ok(CommandLine { pipeline, modifier })
}
