//! PipeSh: パイプラインとリダイレクトに対応した小さなシェル。
//!
//! 1行を字句解析して引数ベクタを作り、構文チェックの後にバックグラウンド指定と
//! リダイレクトを取り出し、パイプで段に分割してプロセスを生成する。
//!
//! - [`lexer`] → [`argv`] → [`validate`] → [`modifier`] → [`pipeline`]: 1行のパース。[`command::parse`]でまとめて行う
//! - [`executor`]: fork & execと組み込みコマンド
//! - [`jobs`]: 回収していないプロセスのテーブル
//! - [`shell`]: 読み込みループとworkerスレッド

pub mod argv;
pub mod command;
pub mod config;
pub mod executor;
pub mod helper;
pub mod jobs;
pub mod lexer;
pub mod logging;
pub mod modifier;
pub mod pipeline;
pub mod shell;
pub mod validate;
