use nix::{
    sys::wait::{WaitStatus, waitpid},
    unistd::Pid,
};
use pipesh::{
    command::{CommandLine, parse},
    executor::{self, EXIT_EXEC_FAILURE, EXIT_REDIRECT_FAILURE, Spawned},
    lexer::OperatorSet,
};
use std::{fs, os::unix::io::AsRawFd, path::Path};
use tempfile::TempDir;

fn parse_line(line: &str) -> CommandLine {
    parse(line, &OperatorSet::default()).unwrap_or_else(|e| panic!("{line}: {e}"))
}

/// 1つのプロセスの終了を待って終了コードを返す
fn wait_one(pid: Pid) -> i32 {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return code,
            Ok(WaitStatus::Signaled(_, sig, _)) => return 128 + sig as i32,
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(e) => panic!("waitpid({pid}): {e}"),
        }
    }
}

/// 1行を実行し、段ごとの終了コードを返す
fn run(line: &str) -> Vec<i32> {
    let cmd = parse_line(line);
    let Spawned { pids, .. } = executor::spawn_pipeline(&cmd.pipeline, &cmd.modifier, None).unwrap();
    assert_eq!(pids.len(), cmd.pipeline.len());
    pids.into_iter().map(wait_one).collect()
}

fn path_in(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).display().to_string()
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn echo_to_file_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "out.txt");
    fs::write(&out, "old contents that are longer\n").unwrap();

    assert_eq!(run(&format!("echo hi > {out}")), vec![0]);
    assert_eq!(read(&out), "hi\n");
}

#[test]
fn append_creates_and_appends() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "log.txt");

    assert_eq!(run(&format!("echo one >> {out}")), vec![0]);
    assert_eq!(run(&format!("echo two >>{out}")), vec![0]);
    assert_eq!(read(&out), "one\ntwo\n");
}

#[test]
fn three_stage_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "out.txt");

    let status = run(&format!("echo hello world | tr a-z A-Z | tr -d O > {out}"));
    assert_eq!(status, vec![0, 0, 0]);
    assert_eq!(read(&out), "HELL WRLD\n");
}

#[test]
fn input_and_output_redirection_compose() {
    let dir = tempfile::tempdir().unwrap();
    let input = path_in(&dir, "in.txt");
    let out = path_in(&dir, "out.txt");
    fs::write(&input, "b\na\nc\n").unwrap();

    assert_eq!(run(&format!("sort < {input} > {out}")), vec![0]);
    assert_eq!(read(&out), "a\nb\nc\n");

    // 入力は最初の段、出力は最後の段にのみ適用される
    let out2 = path_in(&dir, "count.txt");
    assert_eq!(run(&format!("cat | wc -l > {out2} < {input}")), vec![0, 0]);
    assert_eq!(read(&out2).trim(), "3");
}

#[test]
fn quoted_arguments_and_filenames() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "a|b.txt");

    assert_eq!(run(&format!("echo \"x  |  y\" > \"{out}\"")), vec![0]);
    assert_eq!(read(&out), "x  |  y\n");
}

#[test]
fn missing_program_does_not_abort_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "out.txt");

    let status = run(&format!("echo data | pipesh-no-such-command | cat > {out}"));
    assert_eq!(status[1], EXIT_EXEC_FAILURE);
    assert_eq!(status[2], 0);
    assert_eq!(read(&out), "");
}

#[test]
fn missing_input_file_fails_first_stage_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = path_in(&dir, "missing.txt");
    let out = path_in(&dir, "out.txt");

    let status = run(&format!("cat | wc -c < {input} > {out}"));
    assert_eq!(status[0], EXIT_REDIRECT_FAILURE);
    assert_eq!(status[1], 0);
    assert_eq!(read(&out).trim(), "0");
}

#[test]
fn unwritable_output_fails_last_stage() {
    let status = run("echo hi > /nonexistent/pipesh/out.txt");
    assert_eq!(status, vec![EXIT_REDIRECT_FAILURE]);
}

#[test]
fn background_flag_does_not_change_spawning() {
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "out.txt");

    let cmd = parse_line(&format!("echo bg > {out} &"));
    assert!(cmd.modifier.background);
    let spawned = executor::spawn_pipeline(&cmd.pipeline, &cmd.modifier, None).unwrap();
    assert_eq!(spawned.pgid, spawned.pids[0]);
    assert_eq!(spawned.pids.iter().map(|p| wait_one(*p)).collect::<Vec<_>>(), vec![0]);
    assert_eq!(read(&out), "bg\n");
}

#[test]
fn pipeline_shares_one_process_group() {
    let cmd = parse_line("sleep 0.1 | sleep 0.1");
    let spawned = executor::spawn_pipeline(&cmd.pipeline, &cmd.modifier, None).unwrap();
    for pid in &spawned.pids {
        let pgid = nix::unistd::getpgid(Some(*pid));
        // 子が先に終了している場合はESRCH
        if let Ok(pgid) = pgid {
            assert_eq!(pgid, spawned.pgid);
        }
    }
    for pid in spawned.pids {
        assert_eq!(wait_one(pid), 0);
    }
}

#[test]
fn parent_keeps_no_pipe_descriptors() {
    // 親がパイプを閉じていなければcatはEOFを受け取れず終了しない
    let status = run("echo done | cat | cat");
    assert_eq!(status, vec![0, 0, 0]);
}

#[test]
fn terminal_handoff_is_harmless_without_a_tty() {
    // 端末でないファイルを渡すとtcsetpgrpは失敗するが、段の実行は続く
    let dir = tempfile::tempdir().unwrap();
    let out = path_in(&dir, "out.txt");
    let not_a_tty = tempfile::tempfile().unwrap();

    let cmd = parse_line(&format!("echo fg | cat > {out}"));
    let spawned =
        executor::spawn_pipeline(&cmd.pipeline, &cmd.modifier, Some(not_a_tty.as_raw_fd())).unwrap();
    assert_eq!(spawned.pids.iter().map(|p| wait_one(*p)).collect::<Vec<_>>(), vec![0, 0]);
    assert_eq!(read(&out), "fg\n");
}

