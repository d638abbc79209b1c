use crate::{
    argv::ArgVec,
    lexer::{Operator, Word},
};
use std::{fmt, ops::Range};

/// パイプライン。
///
/// 全段の単語を1つのアリーナに持ち、各段はアリーナの範囲で表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    arena: Vec<Word>,
    stages: Vec<Range<usize>>,
}

impl Pipeline {
    /// 段数
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, i: usize) -> Option<&[Word]> {
        self.stages.get(i).map(|r| &self.arena[r.clone()])
    }

    pub fn stages(&self) -> impl Iterator<Item = &[Word]> {
        self.stages.iter().map(|r| &self.arena[r.clone()])
    }
}

/// パイプ演算子で段に分割。パイプ演算子は捨てる
pub fn split(argv: ArgVec) -> Pipeline {
    let words = argv.into_words();
    let mut arena = Vec::with_capacity(words.len());
    let mut stages = Vec::new();
    let mut start = 0;

    for word in words {
        if word.is_operator(Operator::Pipe) {
            stages.push(start..arena.len());
            start = arena.len();
        } else {
            arena.push(word);
        }
    }
    stages.push(start..arena.len());

    Pipeline { arena, stages }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            for (j, word) in stage.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{word}")?;
            }
        }
        Ok(())
    }
}
