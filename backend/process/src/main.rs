use std::{
    fs,
    io::{Write, stdout},
    path::PathBuf,
};

use anyhow::Context;
use clap::Parser;
use serde_json::to_writer;

use process::{CsvLayout, import_history, parse_rows, utils::decode_latin1};

/// Prints the derived daily history of one zone as JSON lines.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    csv: PathBuf,

    zone: String,

    population: u64,

    /// Decode the file as ISO-8859-1 instead of UTF-8.
    #[arg(long)]
    latin1: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let bytes = fs::read(&args.csv).with_context(|| format!("reading {}", args.csv.display()))?;
    let text = if args.latin1 {
        decode_latin1(&bytes)
    } else {
        String::from_utf8(bytes).context("feed is not UTF-8, try --latin1")?
    };

    let rows = parse_rows(text.as_bytes(), &CsvLayout::default())?;
    let history = import_history(&rows, &args.zone, args.population)?;

    let mut out = stdout().lock();
    for record in &history {
        to_writer(&mut out, record)?;
        writeln!(out)?;
    }

    eprintln!("{} records for {}", history.len(), args.zone);
    Ok(())
}
