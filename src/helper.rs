/// シェル全体で使うエラー型
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// システムコール呼び出しのラッパ。EINTR（割り込みによって中断されたシステムコール）ならリトライ。
pub fn syscall<F, T>(f: F) -> Result<T, nix::Error>
where
    F: Fn() -> Result<T, nix::Error>,
{
    loop {
        match f() {
            Err(nix::Error::EINTR) => (), // リトライ
            result => return result,
        }
    }
}

/// ドロップ時にクロージャFを呼び出す型。
pub struct CleanUp<F>
where
    F: Fn(),
{
    pub f: F,
}

impl<F> Drop for CleanUp<F>
where
    F: Fn(),
{
    fn drop(&mut self) {
        (self.f)()
    }
}
