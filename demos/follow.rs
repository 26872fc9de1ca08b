use clap::{Arg, ArgAction, Command};
use logfollow::{FollowParser, LineSink, ParserConfig, SinkError};

struct Printer;

impl LineSink for Printer {
    fn parse(&mut self, line: &[u8]) -> Result<(), SinkError> {
        println!("read line: `{}`", String::from_utf8_lossy(line));
        Ok(())
    }

    fn finish(&mut self, idle_duration: f64) {
        println!("{idle_duration:.1}s since previous run");
    }
}

// running this repeatedly will print lines appended since the previous execution
fn main() -> Result<(), anyhow::Error> {
    let app = Command::new(clap::crate_name!())
        .arg(
            Arg::new("FILE_PATH")
                .long("path")
                .short('p')
                .required(true)
                .help("path to log file that is possibly rotated"),
        )
        .arg(
            Arg::new("NAME")
                .long("name")
                .short('n')
                .default_value("follow-demo")
                .help("name of the position record"),
        )
        .arg(
            Arg::new("WORK_DIR")
                .long("work-dir")
                .short('w')
                .help("directory for position records, defaults to the temp directory"),
        )
        .arg(
            Arg::new("ARCHIVE_DIR")
                .long("archive-dir")
                .short('a')
                .help("directory to search for the rotated file"),
        )
        .arg(
            Arg::new("SILENT")
                .long("silent")
                .short('s')
                .action(ArgAction::SetTrue)
                .help("suppress diagnostics"),
        );

    let args = app.get_matches();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let mut config = ParserConfig::default().silent(args.get_flag("SILENT"));
    if let Some(dir) = args.get_one::<String>("WORK_DIR") {
        config = config.work_dir(dir);
    }
    if let Some(dir) = args.get_one::<String>("ARCHIVE_DIR") {
        config = config.archive_dir(dir);
    }

    let path = args
        .get_one::<String>("FILE_PATH")
        .ok_or_else(|| anyhow::anyhow!("missing --path"))?;
    let name = args
        .get_one::<String>("NAME")
        .ok_or_else(|| anyhow::anyhow!("missing --name"))?;

    let mut parser = FollowParser::with_sink(config, Printer);
    for segment in parser.parse(name, path)? {
        println!(
            "{}: {}..{} ({} rows)",
            segment.file_name.display(),
            segment.start_pos,
            segment.end_pos,
            segment.rows
        );
    }

    Ok(())
}
