use crate::{
    command::{self, CommandLine},
    config::Config,
    executor::{self, Builtin, SpawnError, Spawned},
    helper::{DynError, syscall},
    jobs::{JobTable, Reaped},
    lexer::OperatorSet,
};
use log::{error, info, warn};
use nix::{
    libc,
    sys::{
        signal::{SigHandler, Signal, signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{Pid, tcgetpgrp, tcsetpgrp},
};
use rustyline::{Editor, error::ReadlineError};
use signal_hook::{consts::*, iterator::Signals};
use std::{
    process::exit,
    sync::mpsc::{Receiver, Sender, SyncSender, channel, sync_channel},
    thread,
};

/// workerスレッドが受信するメッセージ
pub(crate) enum WorkerMsg {
    Signal(i32), // シグナルを受信
    Cmd(String), // コマンド入力
    Eof,         // 入力の終わり
}

/// mainスレッドが受信するメッセージ
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ShellMsg {
    Continue(i32), // シェルの読み込みを再開。i32は最後の終了コード
    Quit(i32),     // シェルを終了。i32はシェルの終了コード
}

#[derive(Debug)]
pub struct Shell {
    config: Config,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Shell { config }
    }

    /// mainスレッド。
    pub fn run(&self) -> Result<(), DynError> {
        // SIGTTOUを無視に設定しないと、端末の制御を戻すときに停止してしまう
        unsafe { signal(Signal::SIGTTOU, SigHandler::SigIgn)? };

        let operators = match self.config.operator_set() {
            Ok(ops) => ops,
            Err(e) => {
                eprintln!("PipeSh: {e}。デフォルトの演算子を使用します");
                OperatorSet::default()
            }
        };

        let history = self.config.history_path();
        let mut rl = Editor::<()>::new()?;
        if let Err(e) = rl.load_history(&history) {
            warn!("ヒストリファイルの読み込みに失敗: {e}");
        }

        // チャネルを生成し、signal_handlerとworkerスレッドを生成
        let (worker_tx, worker_rx) = channel();
        let (shell_tx, shell_rx) = sync_channel(0);
        spawn_sig_handler(worker_tx.clone())?;

        // 端末を持たない場合（パイプからの入力など）はNone
        let shell_pgid = tcgetpgrp(libc::STDIN_FILENO).ok();
        Worker::new(operators, shell_pgid).spawn(worker_rx, shell_tx);

        let exit_val; // 終了コード
        let mut prev = 0; // 直前の終了コード
        loop {
            // 1行読み込んで、その行をworkerスレッドに送信
            let face = if prev == 0 { '\u{1F642}' } else { '\u{1F480}' };
            let msg = match rl.readline(&format!("{} {face} %> ", self.config.shell.prompt)) {
                Ok(line) => {
                    let line_trimed = line.trim(); // 行頭と行末の空白文字を削除
                    if line_trimed.is_empty() {
                        continue; // 空のコマンドの場合は再読み込み
                    }
                    rl.add_history_entry(line_trimed); // ヒストリファイルに追加
                    WorkerMsg::Cmd(line)
                }
                Err(ReadlineError::Interrupted) => {
                    eprintln!("PipeSh: 終了はCtrl+d");
                    continue;
                }
                Err(ReadlineError::Eof) => WorkerMsg::Eof,
                Err(e) => {
                    eprintln!("PipeSh: 読み込みエラー\n{e}");
                    exit_val = 1;
                    break;
                }
            };

            worker_tx.send(msg)?;
            match shell_rx.recv()? {
                ShellMsg::Continue(n) => prev = n, // 読み込み再開
                ShellMsg::Quit(n) => {
                    // シェルを終了
                    exit_val = n;
                    break;
                }
            }
        }

        if let Err(e) = rl.save_history(&history) {
            eprintln!("PipeSh: ヒストリファイルへの書き込みに失敗: {e}");
        }
        exit(exit_val);
    }
}

/// signal_handlerスレッド
fn spawn_sig_handler(tx: Sender<WorkerMsg>) -> Result<(), DynError> {
    let mut signals = Signals::new([SIGINT, SIGTSTP, SIGCHLD])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            // シグナルを受信しworkerスレッドに転送
            if tx.send(WorkerMsg::Signal(sig)).is_err() {
                break; // workerスレッドが終了している
            }
        }
    });

    Ok(())
}

#[derive(Debug)]
struct Worker {
    exit_val: i32,           // 終了コード
    fg: Option<usize>,       // フォアグラウンドのジョブID
    jobs: JobTable,          // 回収していないプロセスのテーブル
    shell_pgid: Option<Pid>, // シェルのプロセスグループID。端末がない場合はNone
    operators: OperatorSet,
}

impl Worker {
    fn new(operators: OperatorSet, shell_pgid: Option<Pid>) -> Self {
        Worker {
            exit_val: 0,
            fg: None, // フォアグラウンドはシェル
            jobs: JobTable::new(),
            shell_pgid,
            operators,
        }
    }

    /// workerスレッドを起動。
    fn spawn(mut self, worker_rx: Receiver<WorkerMsg>, shell_tx: SyncSender<ShellMsg>) {
        thread::spawn(move || {
            for msg in worker_rx.iter() {
                let sent = match msg {
                    WorkerMsg::Cmd(line) => self.run_line(&line, &shell_tx),
                    WorkerMsg::Signal(SIGCHLD) => self.wait_child(&shell_tx), // 子プロセスの状態変化管理
                    WorkerMsg::Signal(_) => Ok(()), // 無視
                    WorkerMsg::Eof => self.run_eof(&shell_tx),
                };

                if sent.is_err() {
                    break; // mainスレッドが終了している
                }
            }
        });
    }

    /// 1行を実行。フォアグラウンドのジョブを生成した場合、入力の再開はジョブの終了時
    fn run_line(&mut self, line: &str, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        let cmd = match command::parse(line, &self.operators) {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("PipeSh: {e}");
                warn!("parse error: {e}: {line}");
                self.exit_val = 1;
                shell_tx.send(ShellMsg::Continue(self.exit_val))?;
                return Ok(());
            }
        };

        if let Some(b) = executor::builtin(&cmd) {
            return self.built_in_cmd(b, shell_tx);
        }

        if !self.spawn_child(line, &cmd) {
            // フォアグラウンドのジョブがなければシェルからの入力を再開
            shell_tx.send(ShellMsg::Continue(self.exit_val))?;
            return Ok(());
        }

        // すでに終了した子プロセスを回収
        self.wait_child(shell_tx)
    }

    /// 子プロセスを生成。フォアグラウンドのジョブを生成した場合は真
    fn spawn_child(&mut self, line: &str, cmd: &CommandLine) -> bool {
        let background = cmd.modifier.background;
        let terminal = self.shell_pgid.map(|_| libc::STDIN_FILENO);
        let spawned = executor::spawn_pipeline(&cmd.pipeline, &cmd.modifier, terminal);
        let Spawned { pgid, pids } = match spawned {
            Ok(spawned) => spawned,
            Err(SpawnError::Fork { spawned, source }) if !spawned.is_empty() => {
                // 生成できたプロセスは回収のために登録する
                eprintln!("PipeSh: プロセス生成エラー: {source}");
                error!("fork failed after {} stage(s): {source}", spawned.len());
                Spawned {
                    pgid: spawned[0],
                    pids: spawned,
                }
            }
            Err(e) => {
                eprintln!("PipeSh: {e}");
                error!("spawn failed: {e}");
                self.exit_val = 1;
                return false;
            }
        };

        let job_id = self.jobs.insert(line.trim(), pgid, &pids, background);
        info!("[{job_id}] spawned pgid = {pgid}, pids = {pids:?}, background = {background}");

        if background {
            eprintln!("[{job_id}] {pgid}");
            self.exit_val = 0;
            return false;
        }

        // 子プロセスをフォアグラウンドプロセスグループにする。子の側でもexec前に設定済み
        self.fg = Some(job_id);
        if self.shell_pgid.is_some() {
            if let Err(e) = tcsetpgrp(libc::STDIN_FILENO, pgid) {
                warn!("tcsetpgrp failed: {e}");
            }
        }
        true
    }

    /// 組み込みコマンドを実行
    fn built_in_cmd(&mut self, cmd: Builtin, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        match cmd {
            Builtin::Cd(dir) => self.run_cd(&dir, shell_tx),
            Builtin::Exit(arg) => self.run_exit(arg.as_deref(), shell_tx),
        }
    }

    /// カレントディレクトリを変更。失敗してもシェルは継続
    fn run_cd(&mut self, dir: &str, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        match executor::change_dir(dir) {
            Ok(path) => {
                info!("cd: {}", path.display());
                self.exit_val = 0; // 成功
            }
            Err(e) => {
                eprintln!("PipeSh: {e}");
                warn!("{e}");
                self.exit_val = 1; // 失敗
            }
        }

        shell_tx.send(ShellMsg::Continue(self.exit_val))?;
        Ok(())
    }

    /// exitコマンドを実行
    ///
    /// 引数が指定された場合、それを終了コードとしてシェルを終了。
    /// 引数がない場合は、最後に終了したプロセスの終了コードとしてシェルを終了。
    fn run_exit(&mut self, arg: Option<&str>, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        // 実行中のジョブがある場合は終了しない
        if !self.jobs.is_empty() {
            eprintln!("PipeSh: ジョブが実行中なので終了できません");
            self.exit_val = 1; // 失敗
            shell_tx.send(ShellMsg::Continue(self.exit_val))?; // シェルを再開
            return Ok(());
        }

        // 終了コードを取得
        let exit_val = match arg.map(str::parse::<i32>) {
            None => self.exit_val,
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                // 終了コードが整数ではない
                eprintln!("PipeSh: {}は不正な引数です", arg.unwrap_or_default());
                self.exit_val = 1;
                shell_tx.send(ShellMsg::Continue(self.exit_val))?; // シェルを再開
                return Ok(());
            }
        };

        shell_tx.send(ShellMsg::Quit(exit_val))?;
        Ok(())
    }

    /// 入力の終わり。バックグラウンドのジョブが残っていても終了する
    fn run_eof(&mut self, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        self.wait_child(shell_tx)?;
        if !self.jobs.is_empty() {
            eprintln!("PipeSh: {}個のジョブを残して終了します", self.jobs.len());
        }
        shell_tx.send(ShellMsg::Quit(self.exit_val))?;
        Ok(())
    }

    /// 終了した子プロセスをすべて回収。どのジョブに属するかは問わない
    fn wait_child(&mut self, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        // WUNTRACED: 子プロセスの停止
        // WNOHANG: ブロックしない
        let flag = Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG);

        loop {
            match syscall(|| waitpid(Pid::from_raw(-1), flag)) {
                Ok(WaitStatus::Exited(pid, status)) => {
                    // プロセスが終了
                    self.process_term(pid, status, shell_tx)?;
                }
                Ok(WaitStatus::Signaled(pid, sig, core)) => {
                    // プロセスがシグナルにより終了
                    info!(
                        "child terminated by signal{}: pid = {pid}, signal = {sig}",
                        if core { " (core dumped)" } else { "" }
                    );
                    self.process_term(pid, sig as i32 + 128, shell_tx)?;
                }
                // プロセスが停止
                Ok(WaitStatus::Stopped(pid, _sig)) => self.process_stop(pid, shell_tx)?,
                Ok(WaitStatus::StillAlive) => return Ok(()), // waitすべき子プロセスはいない
                Ok(_) => (),
                Err(nix::Error::ECHILD) => return Ok(()), // 子プロセスはいない
                Err(e) => {
                    eprintln!("\nPipeSh: waitが失敗: {e}");
                    error!("waitpid failed: {e}");
                    return Ok(());
                }
            }
        }
    }

    /// プロセスの終了処理
    fn process_term(&mut self, pid: Pid, status: i32, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        let Some(Reaped::Finished(job_id, job)) = self.jobs.remove_pid(pid, status) else {
            return Ok(()); // ジョブにはまだ実行中のプロセスがある
        };

        let status = job.status().unwrap_or(status);
        info!("[{job_id}] finished with {status}: {}", job.line);

        if self.fg == Some(job_id) {
            // フォアグラウンドのジョブが終了した場合、シェルをフォアグラウンドに設定
            self.exit_val = status;
            self.set_shell_fg(shell_tx)?;
        } else {
            eprintln!("[{job_id}] 終了\t{}", job.line);
        }
        Ok(())
    }

    /// プロセスの停止処理。フォアグラウンドのジョブならバックグラウンドに変更してシェルを再開
    fn process_stop(&mut self, pid: Pid, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        let Some(job_id) = self.fg else {
            return Ok(());
        };

        let Some(job) = self.jobs.get(job_id) else {
            return Ok(());
        };
        if !job.pids.contains(&pid) {
            return Ok(());
        }

        eprintln!("\n[{job_id}] 停止\t{}", job.line);
        info!("[{job_id}] stopped by pid {pid}");
        self.jobs.set_background(job_id);
        self.exit_val = 128 + Signal::SIGTSTP as i32;
        self.set_shell_fg(shell_tx)
    }

    /// シェルをフォアグラウンドに設定
    fn set_shell_fg(&mut self, shell_tx: &SyncSender<ShellMsg>) -> Result<(), DynError> {
        self.fg = None;
        if let Some(pgid) = self.shell_pgid {
            if let Err(e) = tcsetpgrp(libc::STDIN_FILENO, pgid) {
                warn!("tcsetpgrp failed: {e}");
            }
        }
        shell_tx.send(ShellMsg::Continue(self.exit_val))?;
        Ok(())
    }
}
