use nix::unistd::Pid;
use std::collections::{BTreeMap, HashMap, HashSet};

/// 1つのパイプラインに属するプロセスの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub pgid: Pid,          // プロセスグループID
    pub line: String,       // 実行コマンド
    pub pids: HashSet<Pid>, // まだ回収していないプロセス
    pub last: Pid,          // 最後の段のプロセス
    pub background: bool,
    status: Option<i32>, // 最後の段の終了コード
}

impl Job {
    /// パイプラインの終了コード。最後の段の終了コードとする
    pub fn status(&self) -> Option<i32> {
        self.status
    }
}

/// プロセスを回収した結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaped {
    Running(usize),       // ジョブにはまだ実行中のプロセスがある
    Finished(usize, Job), // ジョブのプロセスがすべて終了
}

/// プロセステーブル。ジョブIDからジョブへのマップと、PIDからジョブIDへのマップを持つ
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
    pid_to_job: HashMap<Pid, usize>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable::default()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, job_id: usize) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&usize, &Job)> {
        self.jobs.iter()
    }

    /// 新たなジョブIDを取得。空いている最小のIDを使う
    fn new_job_id(&self) -> usize {
        (1..).find(|i| !self.jobs.contains_key(i)).unwrap_or(0)
    }

    /// 新たなジョブ情報を追加し、ジョブIDを返す
    ///
    /// - pids: 段の順に並んだプロセス。空であってはならない
    pub fn insert(&mut self, line: &str, pgid: Pid, pids: &[Pid], background: bool) -> usize {
        assert!(!pids.is_empty());

        let job_id = self.new_job_id();
        for pid in pids {
            assert!(!self.pid_to_job.contains_key(pid));
            self.pid_to_job.insert(*pid, job_id);
        }

        let job = Job {
            pgid,
            line: line.to_string(),
            pids: pids.iter().copied().collect(),
            last: pids[pids.len() - 1],
            background,
            status: None,
        };
        self.jobs.insert(job_id, job);
        job_id
    }

    /// 回収したプロセスをテーブルから削除。
    /// テーブルにないプロセスの場合はNoneを返す。
    pub fn remove_pid(&mut self, pid: Pid, status: i32) -> Option<Reaped> {
        let job_id = self.pid_to_job.remove(&pid)?;
        let job = self.jobs.get_mut(&job_id)?;
        job.pids.remove(&pid);
        if pid == job.last {
            job.status = Some(status);
        }

        if job.pids.is_empty() {
            let job = self.jobs.remove(&job_id)?;
            Some(Reaped::Finished(job_id, job))
        } else {
            Some(Reaped::Running(job_id))
        }
    }

    /// ジョブをバックグラウンドに変更
    pub fn set_background(&mut self, job_id: usize) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.background = true;
        }
    }
}
