use crate::lexer::{Operator, Word};

/// 引数ベクタ。字句解析で得た単語列の所有権を受け取る
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArgVec {
    words: Vec<Word>,
}

impl From<Vec<Word>> for ArgVec {
    fn from(words: Vec<Word>) -> Self {
        ArgVec { words }
    }
}

impl ArgVec {
    pub fn argc(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Word> {
        self.words.get(idx)
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// 最初に現れる演算子の位置
    pub fn position(&self, op: Operator) -> Option<usize> {
        self.words.iter().position(|w| w.is_operator(op))
    }

    /// 演算子の出現回数
    pub fn count(&self, op: Operator) -> usize {
        self.words.iter().filter(|w| w.is_operator(op)).count()
    }

    /// idx番目の単語を取り除き、後ろを左に詰める
    pub fn remove(&mut self, idx: usize) -> Word {
        self.words.remove(idx)
    }

    pub fn into_words(self) -> Vec<Word> {
        self.words
    }
}
