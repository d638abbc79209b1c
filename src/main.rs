use pipesh::{config::Config, logging, shell::Shell};

fn main() {
    let config = Config::load();
    if let Err(e) = logging::init(&config) {
        eprintln!("PipeSh: ログの初期化に失敗: {e}");
    }

    let sh = Shell::new(config);
    if let Err(e) = sh.run() {
        eprintln!("PipeSh: {e}");
        std::process::exit(1);
    }
}
