use std::path::PathBuf;

use gall_preview::RunOptions;

const HELP: &str = "gall-preview: preview a gallery post and its comments.\n\n  gall-preview [--config <file>] <post-url>\n\n  --config <file>      Read settings from <file> instead of the default path\n  --copy               Copy the post link to the clipboard\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message";

enum Command {
    Exit,
    Run(RunOptions),
}

fn main() {
    env_logger::init();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Exit) => return,
        Ok(Command::Run(options)) => options,
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    };

    if let Err(err) = gall_preview::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Command, String> {
    let mut options = RunOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("gall-preview {}", gall_preview::VERSION);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Command::Exit);
            }
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                options.config_file = Some(PathBuf::from(path));
            }
            "--copy" => options.copy_link = true,
            other if other.starts_with('-') => return Err(format!("unknown flag {other}")),
            other => options.link = other.to_string(),
        }
    }
    if options.link.is_empty() {
        return Err("missing post url".to_string());
    }
    Ok(Command::Run(options))
}
