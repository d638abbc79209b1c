//! パイプラインのプロセスを生成する。
//!
//! 段ごとに子プロセスをforkし、段の間をパイプでつなぐ。
//! 入力のリダイレクトは最初の段、出力のリダイレクトは最後の段にのみ適用される。

use crate::{
    command::CommandLine,
    helper::{CleanUp, DynError, syscall},
    lexer::Word,
    modifier::Modifier,
    pipeline::Pipeline,
};
use log::debug;
use nix::{
    errno::Errno,
    fcntl::{OFlag, open},
    libc,
    sys::{
        signal::{SigHandler, Signal, signal},
        stat::Mode,
    },
    unistd::{self, ForkResult, Pid, dup2, execvp, fork, setpgid, tcsetpgrp},
};
use std::{
    ffi::{CStr, CString, NulError},
    fmt,
    os::unix::io::RawFd,
    path::PathBuf,
};

/// リダイレクトに失敗した子プロセスの終了コード
pub const EXIT_REDIRECT_FAILURE: i32 = 1;

/// execに失敗した子プロセスの終了コード
pub const EXIT_EXEC_FAILURE: i32 = 127;

/// シェル自身のプロセスで実行する組み込みコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Cd(String),
    Exit(Option<String>),
}

/// 1段だけのコマンドが組み込みコマンドならそれを返す
pub fn builtin(cmd: &CommandLine) -> Option<Builtin> {
    if cmd.pipeline.len() != 1 {
        return None; // パイプ中の組み込みコマンドは外部コマンドとして扱う
    }

    let stage = cmd.pipeline.stage(0)?;
    match stage.first()?.unquoted()?.as_str() {
        "cd" => stage.get(1).and_then(Word::unquoted).map(Builtin::Cd),
        "exit" => Some(Builtin::Exit(stage.get(1).and_then(Word::unquoted))),
        _ => None,
    }
}

/// カレントディレクトリを変更し、変更後のディレクトリを返す
pub fn change_dir(dir: &str) -> Result<PathBuf, DynError> {
    std::env::set_current_dir(dir).map_err(|e| format!("cdに失敗: {dir}: {e}"))?;
    Ok(std::env::current_dir()?)
}

/// 生成したパイプラインのプロセス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spawned {
    pub pgid: Pid,      // プロセスグループID。最初の段のPID
    pub pids: Vec<Pid>, // 段の順に並んだPID
}

#[derive(Debug)]
pub enum SpawnError {
    InvalidArgument(NulError), // 引数にNUL文字が含まれる
    Pipe(nix::Error),
    Fork {
        spawned: Vec<Pid>, // 失敗する前に生成できたプロセス
        source: nix::Error,
    },
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::InvalidArgument(e) => write!(f, "不正な引数: {e}"),
            SpawnError::Pipe(e) => write!(f, "パイプの生成に失敗: {e}"),
            SpawnError::Fork { source, .. } => write!(f, "プロセス生成エラー: {source}"),
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::InvalidArgument(e) => Some(e),
            SpawnError::Pipe(e) => Some(e),
            SpawnError::Fork { source, .. } => Some(source),
        }
    }
}

impl From<NulError> for SpawnError {
    fn from(e: NulError) -> Self {
        SpawnError::InvalidArgument(e)
    }
}

/// 1つの段の入出力
struct StageIo<'a> {
    terminal: Option<RawFd>,              // フォアグラウンドのジョブに渡す端末
    input: Option<RawFd>,                 // 前の段からのパイプの読み込み側
    output: Option<RawFd>,                // 次の段へのパイプの書き込み側
    redirect_in: Option<&'a CStr>,        // 最初の段のみ
    redirect_out: Option<(&'a CStr, bool)>, // 最後の段のみ。boolは追記モード
}

/// パイプラインの全段をfork & execする。
///
/// 親プロセスは子を待たない。待つかどうかは呼び出し側が修飾子を見て決める。
/// forkに失敗した場合も、それまでに生成したプロセスは[`SpawnError::Fork`]で返す。
///
/// terminalを指定すると、フォアグラウンドのジョブでは各段がexec前に端末の制御を
/// 自身のプロセスグループに移す。最初の段が端末を読む前にSIGTTINで停止しないようにするため。
pub fn spawn_pipeline(
    pipeline: &Pipeline,
    modifier: &Modifier,
    terminal: Option<RawFd>,
) -> Result<Spawned, SpawnError> {
    assert_ne!(pipeline.len(), 0); // コマンドが空でないか検査

    // fork前に引数とファイル名をCStringに変換しておく
    let argvs = pipeline
        .stages()
        .map(to_cstrings)
        .collect::<Result<Vec<_>, _>>()?;
    let input = modifier.input.as_deref().map(CString::new).transpose()?;
    let output = modifier.output.as_deref().map(CString::new).transpose()?;

    let n = argvs.len();
    let pipes = create_pipes(n - 1)?;
    let terminal = if modifier.background { None } else { terminal };

    // 親プロセスのパイプはすべての段をforkした後にクローズ
    let cleanup_pipe = CleanUp {
        f: || close_pipes(&pipes),
    };

    let mut pgid = Pid::from_raw(0);
    let mut pids = Vec::with_capacity(n);
    for (i, argv) in argvs.iter().enumerate() {
        let io = StageIo {
            terminal,
            input: if i > 0 { Some(pipes[i - 1].0) } else { None },
            output: if i + 1 < n { Some(pipes[i].1) } else { None },
            redirect_in: if i == 0 { input.as_deref() } else { None },
            redirect_out: if i + 1 == n {
                output.as_deref().map(|path| (path, modifier.append))
            } else {
                None
            },
        };

        match fork_exec(pgid, argv, &io, &pipes) {
            Ok(child) => {
                if i == 0 {
                    pgid = child; // 最初の段のPIDがプロセスグループID
                }
                pids.push(child);
            }
            Err(source) => {
                return Err(SpawnError::Fork {
                    spawned: pids,
                    source,
                });
            }
        }
    }

    std::mem::drop(cleanup_pipe); // パイプをクローズ
    debug!("spawned: pgid = {pgid}, pids = {pids:?}");

    Ok(Spawned { pgid, pids })
}

/// 段の単語をexecvpに渡す引数に変換。クォート文字は取り除く
fn to_cstrings(stage: &[Word]) -> Result<Vec<CString>, NulError> {
    stage
        .iter()
        .map(|w| CString::new(w.unquoted().unwrap_or_else(|| w.to_string())))
        .collect()
}

/// (読み込み側, 書き込み側)のパイプをn個作成
fn create_pipes(n: usize) -> Result<Vec<(RawFd, RawFd)>, SpawnError> {
    let mut pipes = Vec::with_capacity(n);
    for _ in 0..n {
        match cloexec_pipe() {
            Ok(p) => pipes.push(p),
            Err(e) => {
                close_pipes(&pipes);
                return Err(SpawnError::Pipe(e));
            }
        }
    }
    Ok(pipes)
}

/// close-on-execのパイプを作成。
///
/// 他のスレッドがforkした子にパイプが漏れないよう、フラグは作成と同時に設定する。
/// dup2で複製した標準入出力にはフラグが引き継がれない。
#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn cloexec_pipe() -> Result<(RawFd, RawFd), nix::Error> {
    unistd::pipe2(OFlag::O_CLOEXEC)
}

/// pipe2がないOSでは作成後に設定する
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn cloexec_pipe() -> Result<(RawFd, RawFd), nix::Error> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};

    let (r, w) = unistd::pipe()?;
    for fd in [r, w] {
        if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            let _ = unistd::close(r);
            let _ = unistd::close(w);
            return Err(e);
        }
    }
    Ok((r, w))
}

fn close_pipes(pipes: &[(RawFd, RawFd)]) {
    for &(r, w) in pipes {
        let _ = syscall(|| unistd::close(r));
        let _ = syscall(|| unistd::close(w));
    }
}

/// プロセスグループIDを指定してfork & exec
/// pgidが0の場合は子プロセスのPIDが、プロセスグループIDとなる
fn fork_exec(
    pgid: Pid,
    argv: &[CString],
    io: &StageIo,
    pipes: &[(RawFd, RawFd)],
) -> Result<Pid, nix::Error> {
    match syscall(|| unsafe { fork() })? {
        ForkResult::Parent { child, .. } => {
            // 子プロセスのプロセスグループIDをpgidに設定。子が先にexecした場合は子の側で設定済み
            let _ = setpgid(child, pgid);
            Ok(child)
        }
        ForkResult::Child => exec_child(pgid, argv, io, pipes),
    }
}

/// 子プロセス側の処理。fork後なのでメモリ確保は行わない
fn exec_child(pgid: Pid, argv: &[CString], io: &StageIo, pipes: &[(RawFd, RawFd)]) -> ! {
    let _ = setpgid(Pid::from_raw(0), pgid);

    // 端末の制御を移す。SIGTTOUを無視している間に行う必要がある
    if let Some(fd) = io.terminal {
        let pgid = if pgid == Pid::from_raw(0) { unistd::getpid() } else { pgid };
        let _ = tcsetpgrp(fd, pgid);
    }

    // シェルが無視しているシグナルを元に戻す
    unsafe {
        let _ = signal(Signal::SIGTTOU, SigHandler::SigDfl);
        let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
    }

    // 標準入出力をパイプに設定
    if let Some(fd) = io.input {
        if let Err(e) = syscall(|| dup2(fd, libc::STDIN_FILENO)) {
            report(b"stdin", e);
            exit_child(EXIT_REDIRECT_FAILURE);
        }
    }
    if let Some(fd) = io.output {
        if let Err(e) = syscall(|| dup2(fd, libc::STDOUT_FILENO)) {
            report(b"stdout", e);
            exit_child(EXIT_REDIRECT_FAILURE);
        }
    }

    // 兄弟の段のものも含め、使わないパイプをクローズ
    close_pipes(pipes);

    if let Some(path) = io.redirect_in {
        if let Err(e) = redirect(path, libc::STDIN_FILENO, OFlag::O_RDONLY) {
            report(path.to_bytes(), e);
            exit_child(EXIT_REDIRECT_FAILURE);
        }
    }
    if let Some((path, append)) = io.redirect_out {
        let mode = if append { OFlag::O_APPEND } else { OFlag::O_TRUNC };
        let flags = OFlag::O_WRONLY | OFlag::O_CREAT | mode;
        if let Err(e) = redirect(path, libc::STDOUT_FILENO, flags) {
            report(path.to_bytes(), e);
            exit_child(EXIT_REDIRECT_FAILURE);
        }
    }

    // 実行ファイルをメモリに読み込み
    let Err(e) = execvp(&argv[0], argv);
    report(argv[0].to_bytes(), e);
    exit_child(EXIT_EXEC_FAILURE)
}

/// fork後の子プロセスを終了。atexitハンドラやバッファのフラッシュは行わない
fn exit_child(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// ファイルを開いてtarget_fdに設定
fn redirect(path: &CStr, target_fd: RawFd, flags: OFlag) -> Result<(), Errno> {
    let fd = syscall(|| open(path, flags, Mode::from_bits_truncate(0o666)))?;
    if fd != target_fd {
        let result = syscall(|| dup2(fd, target_fd));
        let _ = syscall(|| unistd::close(fd));
        result?;
    }
    Ok(())
}

/// 子プロセスから標準エラー出力にエラーを書き込む
fn report(name: &[u8], e: Errno) {
    let parts: [&[u8]; 5] = [b"PipeSh: ", name, b": ", e.desc().as_bytes(), b"\n"];
    for s in parts {
        let _ = unistd::write(libc::STDERR_FILENO, s);
    }
}
