use std::path::PathBuf;

use rocketfeed::RunOptions;

fn main() {
    let Some(options) = handle_cli_flags() else {
        return;
    };

    if let Err(err) = rocketfeed::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

/// Parses arguments. Returns `None` when a flag was fully handled here.
fn handle_cli_flags() -> Option<RunOptions> {
    let mut options = RunOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("rocketfeed {}", rocketfeed::VERSION);
                return None;
            }
            "--help" | "-h" => {
                println!(
                    "rocketfeed: a Reddit front page feed driven from the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --offline            Use generated posts instead of the Reddit API\n  --config <path>      Read configuration from <path>\n\nCommands: n next, p previous, u upvote, d downvote, c comments, m load more, q quit"
                );
                return None;
            }
            "--offline" => options.offline = true,
            "--config" => match args.next() {
                Some(path) => options.config_file = Some(PathBuf::from(path)),
                None => {
                    eprintln!("error: --config needs a path");
                    std::process::exit(2);
                }
            },
            other => {
                eprintln!("error: unknown argument {other}");
                std::process::exit(2);
            }
        }
    }
    Some(options)
}
