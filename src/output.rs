use std::io::{self, Write};

use serde::Serialize;

use crate::app::{FetchResult, ListResult, ProgressEvent, ProgressSink, ResolveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_resolve(result: &ResolveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable summaries on stdout, progress lines on stderr.
pub struct TextOutput;

const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

impl TextOutput {
    pub fn print_list(result: &ListResult) {
        println!("{CYAN}{} basins in {}{RESET}", result.basins.len(), result.region);
        for basin in &result.basins {
            println!("{}  {}", basin.id, basin.name);
        }
    }

    pub fn print_resolve(result: &ResolveResult) {
        let [min_x, min_y, max_x, max_y] = result.bounds;
        println!("{CYAN}{} {}{RESET}", result.id, result.name);
        println!("  crs:      {}", result.crs);
        println!("  polygons: {}", result.polygons);
        println!("  bounds:   {min_x:.1} {min_y:.1} {max_x:.1} {max_y:.1}");
    }

    pub fn print_fetch(result: &FetchResult) {
        println!("{GREEN}basin {} {} ({}){RESET}", result.id, result.name, result.crs);
        println!(
            "  dem:       {} ({}x{})",
            result.paths.dem, result.dem_cols, result.dem_rows
        );
        println!(
            "  flowlines: {} ({} features)",
            result.paths.flowlines, result.flowlines
        );
        println!("  roads:     {} ({} features)", result.paths.roads, result.roads);
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}
