use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use cdrip::aggregator;
use cdrip::cd::drive::{detect_drives, CdDrive};
use cdrip::cover_pipeline;
use cdrip::cd::ripper::{self, RipMode, RipOptions, RipProgress};
use cdrip::cddb::CddbServer;
use cdrip::config::{self, CdripConfig};
use cdrip::cover_art::{self, CoverArtPolicy};
use cdrip::retag;
use cdrip::tagged_toc;
use cdrip::tags::{self, CddbEntry};
use cdrip::toc::DiscToc;

#[derive(Debug, Default)]
struct CliOptions {
    config_file: Option<PathBuf>,
    device: Option<PathBuf>,
    format: Option<String>,
    compression: Option<i32>,
    max_width: Option<u32>,
    mode: Option<RipMode>,
    repeat: Option<bool>,
    sort: Option<bool>,
    auto: Option<bool>,
    speed_fast: Option<bool>,
    discogs: Option<CoverArtPolicy>,
    filter_title: Option<String>,
    update_paths: Vec<String>,
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [options]", program);
    eprintln!("  -c  / --config <file>:      Config file path (default: ./cdrip.conf, ~/.cdrip.conf)");
    eprintln!("  -d  / --device <path>:      CD drive device (default: auto-detect)");
    eprintln!("  -f  / --format <template>:  Destination path template");
    eprintln!("  -z  / --compression <0-8>:  FLAC compression level (default: auto)");
    eprintln!("  -m  / --mode <fast|best>:   Read integrity mode (default: best)");
    eprintln!("  -w  / --max-width <px>:     Cover art width budget (default: 512)");
    eprintln!("  -r  / --repeat:             Prompt for the next disc after finishing");
    eprintln!("  -s  / --sort:               Sort metadata candidates by album, then artist");
    eprintln!("  -a  / --auto:               Non-interactive; select the first candidate");
    eprintln!("  -dc / --discogs <mode>:     Cover art via Discogs: no, always (default), fallback");
    eprintln!("  -ft / --filter-title <re>:  Keep only candidates whose title matches");
    eprintln!("  --speed <slow|fast>:        Drive read speed hint");
    eprintln!("  -u  / --update <path>...:   Retag existing FLAC files instead of ripping");
    eprintln!("  -h  / --help:               This message");
}

fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = CliOptions::default();
    let mut i = 1;
    let take_value = |args: &[String], i: usize, flag: &str| -> Result<String, String> {
        args.get(i + 1)
            .cloned()
            .ok_or_else(|| format!("{} requires a value", flag))
    };
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                opts.config_file = Some(PathBuf::from(take_value(&args, i, "--config")?));
                i += 2;
            }
            "-d" | "--device" => {
                opts.device = Some(PathBuf::from(take_value(&args, i, "--device")?));
                i += 2;
            }
            "-f" | "--format" => {
                opts.format = Some(take_value(&args, i, "--format")?);
                i += 2;
            }
            "-z" | "--compression" => {
                let raw = take_value(&args, i, "--compression")?;
                let level = if raw.eq_ignore_ascii_case("auto") {
                    -1
                } else {
                    raw.parse()
                        .map_err(|_| format!("invalid compression level: {}", raw))?
                };
                opts.compression = Some(level);
                i += 2;
            }
            "-m" | "--mode" => {
                let raw = take_value(&args, i, "--mode")?;
                opts.mode = Some(RipMode::parse(&raw).ok_or_else(|| {
                    format!("invalid mode: {} (expected fast|best|default)", raw)
                })?);
                i += 2;
            }
            "-w" | "--max-width" => {
                let raw = take_value(&args, i, "--max-width")?;
                let width: u32 = raw
                    .parse()
                    .map_err(|_| format!("invalid max width: {}", raw))?;
                if width == 0 {
                    return Err("max width must be positive".to_string());
                }
                opts.max_width = Some(width);
                i += 2;
            }
            "-r" | "--repeat" => {
                opts.repeat = Some(true);
                i += 1;
            }
            "-s" | "--sort" => {
                opts.sort = Some(true);
                i += 1;
            }
            "-a" | "--auto" => {
                opts.auto = Some(true);
                i += 1;
            }
            "--speed" => {
                let raw = take_value(&args, i, "--speed")?;
                opts.speed_fast = Some(match raw.to_lowercase().as_str() {
                    "slow" => false,
                    "fast" => true,
                    other => return Err(format!("invalid speed: {}", other)),
                });
                i += 2;
            }
            "-dc" | "--discogs" => {
                let raw = take_value(&args, i, "--discogs")?;
                opts.discogs = Some(CoverArtPolicy::parse(&raw).ok_or_else(|| {
                    format!("invalid discogs mode: {} (expected no|always|fallback)", raw)
                })?);
                i += 2;
            }
            "-ft" | "--filter-title" => {
                opts.filter_title = Some(take_value(&args, i, "--filter-title")?);
                i += 2;
            }
            "-u" | "--update" => {
                i += 1;
                while i < args.len() && !args[i].starts_with('-') {
                    opts.update_paths.push(args[i].clone());
                    i += 1;
                }
                if opts.update_paths.is_empty() {
                    return Err("--update requires at least one path".to_string());
                }
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(opts)
}

fn merge_cli_into_config(config: &mut CdripConfig, cli: &CliOptions) -> Result<(), String> {
    if let Some(device) = &cli.device {
        config.device = Some(device.clone());
    }
    if let Some(format) = &cli.format {
        config.format = format.clone();
    }
    if let Some(level) = cli.compression {
        if !(-1..=8).contains(&level) {
            return Err(format!("compression level {} out of range", level));
        }
        config.compression_level = level;
    }
    if let Some(width) = cli.max_width {
        config.max_width = width;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(repeat) = cli.repeat {
        config.repeat = repeat;
    }
    if let Some(sort) = cli.sort {
        config.sort = sort;
    }
    if let Some(auto) = cli.auto {
        config.auto_mode = auto;
    }
    if let Some(speed_fast) = cli.speed_fast {
        config.speed_fast = speed_fast;
    }
    if let Some(discogs) = cli.discogs {
        config.discogs = discogs;
    }
    if let Some(pattern) = &cli.filter_title {
        config.filter_title = Some(
            regex::RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| format!("invalid --filter-title pattern: {}", e))?,
        );
    }
    Ok(())
}

struct Selection {
    selected: CddbEntry,
    candidates: Vec<CddbEntry>,
}

/// Fetched entries per disc, so update runs over a whole album only
/// query the providers once.
type EntryCache = std::collections::HashMap<String, Vec<CddbEntry>>;

fn metadata_cache_key(toc: &DiscToc) -> String {
    format!(
        "{}|{}|{}|{}",
        toc.cddb_discid.as_deref().unwrap_or_default(),
        toc.mb_discid.as_deref().unwrap_or_default(),
        toc.mb_release_id.as_deref().unwrap_or_default(),
        toc.mb_medium_id.as_deref().unwrap_or_default()
    )
}

fn read_line() -> String {
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return String::new();
    }
    line.trim().to_string()
}

/// List the fetched candidates and let the user pick one or more (the
/// picks are merged). `0` skips metadata; auto mode takes the first.
async fn select_entry(
    toc: &DiscToc,
    servers: &[CddbServer],
    config: &CdripConfig,
    allow_fallback: bool,
    cache: Option<&mut EntryCache>,
) -> Option<Selection> {
    println!(
        "CDDB disc id: \"{}\"",
        toc.cddb_discid.as_deref().unwrap_or("unknown")
    );
    println!(
        "MusicBrainz disc id: \"{}\"",
        toc.mb_discid.as_deref().unwrap_or("unknown")
    );

    let cache_key = metadata_cache_key(toc);
    let cached = cache
        .as_ref()
        .and_then(|c| c.get(&cache_key))
        .cloned();
    let fetched = match cached {
        Some(entries) => entries,
        None => {
            println!("\nFetching music tags from servers ...");
            let outcome = match aggregator::fetch_cddb_entries(toc, servers).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("Metadata fetch failed: {}", e);
                    return None;
                }
            };
            if let Some(notice) = &outcome.notice {
                eprintln!("CDDB fetch notice: {}", notice);
            }
            if let Some(cache) = cache {
                cache.insert(cache_key, outcome.entries.clone());
            }
            outcome.entries
        }
    };

    let outcome_entries = fetched;
    let fetched_count = outcome_entries.len();
    let mut indices: Vec<usize> = (0..fetched_count)
        .filter(|&i| {
            config
                .filter_title
                .as_ref()
                .map(|re| re.is_match(&outcome_entries[i].album_media_title()))
                .unwrap_or(true)
        })
        .collect();
    if config.filter_title.is_some() && fetched_count > 0 {
        println!(
            "Title filter --> {}/{} candidate(s)",
            indices.len(),
            fetched_count
        );
    }

    let had_candidates = !indices.is_empty();
    if !had_candidates {
        eprintln!("No CDDB matches found across configured servers");
        if !allow_fallback {
            return None;
        }
    }
    if config.sort {
        indices.sort_by_key(|&i| {
            let e = &outcome_entries[i];
            (
                e.album_media_title().to_lowercase(),
                e.album_tag("ARTIST").to_lowercase(),
            )
        });
    }

    let entries: Vec<CddbEntry> = if had_candidates {
        indices
            .iter()
            .map(|&i| outcome_entries[i].clone())
            .collect()
    } else {
        vec![tags::fallback_entry(toc)]
    };

    for (i, entry) in entries.iter().enumerate() {
        let mut source = entry.source_label.clone();
        if source.is_empty() {
            source = "none".to_string();
        }
        if entry.source_label.to_lowercase() == "musicbrainz"
            && (entry.cover_art.available || entry.cover_art.has_data())
        {
            source.push_str(" with cover art");
        }
        println!(
            "[{}] {} - {} (via {})",
            i + 1,
            entry.album_tag("ARTIST"),
            entry.album_media_title(),
            source
        );
    }
    println!("[0] (Ignore all, not use these tags)");

    let choices: Vec<usize> = if config.auto_mode {
        if had_candidates {
            println!(
                "\nAuto mode: selected \"{} - {}\".",
                entries[0].album_tag("ARTIST"),
                entries[0].album_media_title()
            );
            vec![1]
        } else {
            println!("\nAuto mode: no CDDB candidates; proceeding without selection.");
            vec![0]
        }
    } else {
        loop {
            print!(
                "\nSelect match [0-{}] (comma/space separated, default 1): ",
                entries.len()
            );
            let _ = std::io::stdout().flush();
            let line = read_line();
            if line.is_empty() {
                break vec![1];
            }
            let parsed: Result<Vec<usize>, _> = line
                .split([',', ' '])
                .filter(|t| !t.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(choices)
                    if !choices.is_empty() && choices.iter().all(|&c| c <= entries.len()) =>
                {
                    break choices;
                }
                _ => println!("Invalid selection."),
            }
        }
    };

    if choices.contains(&0) {
        if !allow_fallback {
            return None;
        }
        return Some(Selection {
            selected: tags::fallback_entry(toc),
            candidates: Vec::new(),
        });
    }

    let picked: Vec<&CddbEntry> = choices.iter().map(|&c| &entries[c - 1]).collect();
    let selected = if picked.len() == 1 {
        picked[0].clone()
    } else {
        tags::merge_entries(toc, &picked)?
    };
    Some(Selection {
        selected,
        candidates: choices.iter().map(|&c| entries[c - 1].clone()).collect(),
    })
}

/// Render the fetched cover in the terminal with half-block cells and
/// 24-bit color escapes.
fn print_cover_preview(entry: &CddbEntry) {
    if !entry.cover_art.has_data() {
        return;
    }
    let Some((w, h, rgb)) = cover_pipeline::thumbnail_rgb(&entry.cover_art.data, 40, 40) else {
        return;
    };
    let pixel = |x: u32, y: u32| -> (u8, u8, u8) {
        let i = ((y * w + x) * 3) as usize;
        (rgb[i], rgb[i + 1], rgb[i + 2])
    };
    println!();
    let mut y = 0;
    while y < h {
        let mut line = String::new();
        for x in 0..w {
            let (tr, tg, tb) = pixel(x, y);
            let (br, bg, bb) = if y + 1 < h {
                pixel(x, y + 1)
            } else {
                (0, 0, 0)
            };
            line.push_str(&format!(
                "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m\u{2580}",
                tr, tg, tb, br, bg, bb
            ));
        }
        line.push_str("\x1b[0m");
        println!("{}", line);
        y += 2;
    }
    println!();
}

fn format_mmss(sec: f64) -> String {
    let total = sec.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn print_progress(info: &RipProgress) {
    // Early ETAs are noise; wait for some wall-clock history.
    let show_eta = info.wall_elapsed_sec >= 10.0;
    let remaining = if info.wall_total_sec > 0.0 {
        info.wall_total_sec - info.wall_elapsed_sec
    } else {
        info.total_album_sec - info.elapsed_total_sec
    };
    let bar_width = 20usize;
    let filled = ((info.percent / 100.0 * bar_width as f64) as usize).min(bar_width);
    let mut bar = "=".repeat(filled);
    if filled < bar_width {
        bar.push('>');
        bar.push_str(&"-".repeat(bar_width - filled - 1));
    }
    print!(
        "\rTrack {:2}/{:2} [ETA: {} {}]: \"{}\"",
        info.track_number,
        info.total_tracks,
        if show_eta {
            format_mmss(remaining)
        } else {
            "--:--".to_string()
        },
        bar,
        info.track_name
    );
    let _ = std::io::stdout().flush();
    if info.percent >= 100.0 {
        println!();
    }
}

async fn rip_disc(config: &CdripConfig, eject_after: bool) -> Result<(), String> {
    let drives = detect_drives(config.device.as_deref());
    if drives.is_empty() {
        return Err("No CD drive found".to_string());
    }
    let mut drive = None;
    for path in &drives {
        match CdDrive::open(path, config.speed_fast) {
            Ok(opened) => {
                info!("using drive {}", path.display());
                drive = Some(opened);
                break;
            }
            Err(e) => warn!("skipping {}: {}", path.display(), e),
        }
    }
    let drive = drive.ok_or_else(|| "No usable CD drive".to_string())?;

    let toc = drive.read_toc().map_err(|e| e.to_string())?;

    let Some(mut selection) = select_entry(&toc, &config.servers, config, true, None).await
    else {
        return Err("no metadata selected".to_string());
    };

    let cover = cover_art::ensure_cover_art(
        &mut selection.selected,
        &mut selection.candidates,
        &toc,
        config.discogs,
        config.max_width,
    )
    .await;
    if let Some(notice) = &cover.notice {
        eprintln!("Cover art fetch notice: {}", notice);
    }
    if let Some(source) = cover.source {
        println!("Cover art fetched via {}", source.label());
        if config.allow_aa {
            print_cover_preview(&selection.selected);
        }
    }

    let opts = RipOptions {
        format: config.format.clone(),
        mode: config.mode,
        compression_level: config.compression_level,
        speed_fast: config.speed_fast,
    };

    let meta = selection.selected;
    let total_tracks = toc.tracks.len() as u32;
    let track_secs: Vec<f64> = toc.tracks.iter().map(|t| t.seconds()).collect();
    let total_album_sec: f64 = toc
        .tracks
        .iter()
        .filter(|t| t.is_audio)
        .map(|t| t.seconds())
        .sum();

    let (drive, result) = tokio::task::spawn_blocking(move || {
        let wall_start = Instant::now();
        let mut completed_before = 0.0f64;
        let mut on_progress = |info: &RipProgress| print_progress(info);
        let mut outcome = Ok(());
        for (idx, track) in toc.tracks.iter().enumerate() {
            if let Err(e) = ripper::rip_track(
                &drive,
                track,
                &meta,
                &toc,
                &opts,
                &mut on_progress,
                total_tracks,
                completed_before,
                total_album_sec,
                wall_start,
            ) {
                outcome = Err(e.to_string());
                break;
            }
            if track.is_audio {
                completed_before += track_secs[idx];
            }
        }
        (drive, outcome)
    })
    .await
    .map_err(|e| format!("rip task failed: {}", e))?;
    result?;

    if eject_after {
        if let Err(e) = drive.eject() {
            warn!("{}", e);
        }
    }

    println!("\nDone.");
    Ok(())
}

async fn update_files(config: &CdripConfig, paths: &[String]) -> Result<(), String> {
    let mut updated_total = 0usize;
    let mut metadata_cache = EntryCache::new();
    for (pi, target) in paths.iter().enumerate() {
        println!(
            "\n=== Update target ({}/{}): {} ===",
            pi + 1,
            paths.len(),
            target
        );
        let items = tagged_toc::collect_tagged_tocs(Path::new(target)).map_err(|e| e.to_string())?;
        if items.is_empty() {
            println!("No FLAC files found to update.");
            continue;
        }

        let mut updated = 0usize;
        for (i, item) in items.iter().enumerate() {
            println!("\n[{}/{}] {}", i + 1, items.len(), item.path.display());
            let Some(toc) = &item.toc else {
                println!(
                    "  Skipped: {}",
                    item.reason.as_deref().unwrap_or("invalid TOC")
                );
                continue;
            };
            if !item.valid {
                println!(
                    "  Skipped: {}",
                    item.reason.as_deref().unwrap_or("invalid TOC")
                );
                continue;
            }

            let Some(mut selection) = select_entry(
                toc,
                &config.servers,
                config,
                false,
                Some(&mut metadata_cache),
            )
            .await
            else {
                println!("  Skipped: no metadata selected");
                continue;
            };

            let cover = cover_art::ensure_cover_art(
                &mut selection.selected,
                &mut selection.candidates,
                toc,
                config.discogs,
                config.max_width,
            )
            .await;
            if let Some(notice) = &cover.notice {
                eprintln!("  Cover art fetch notice: {}", notice);
            }
            if cover.source.is_some() && config.allow_aa {
                print_cover_preview(&selection.selected);
            }

            match retag::update_flac_with_entry(item, &selection.selected) {
                Ok(()) => {
                    println!("  Updated.");
                    updated += 1;
                    updated_total += 1;
                }
                Err(e) => println!("  Failed: {}", e),
            }
        }
        println!(
            "\nDone for target \"{}\". Updated {} file(s).",
            target, updated
        );
    }
    println!("\nAll targets done. Updated {} file(s) in total.", updated_total);
    Ok(())
}

async fn run() -> Result<(), String> {
    let cli = parse_args()?;
    let mut config = config::load(cli.config_file.as_deref()).map_err(|e| e.to_string())?;
    merge_cli_into_config(&mut config, &cli)?;

    if !cli.update_paths.is_empty() {
        return update_files(&config, &cli.update_paths).await;
    }

    loop {
        rip_disc(&config, config.repeat).await?;
        if !config.repeat {
            return Ok(());
        }
        print!("\nInsert the next disc and press Enter (or type 'q' to quit): ");
        let _ = std::io::stdout().flush();
        if read_line().eq_ignore_ascii_case("q") {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_target(false)
        .init();

    println!("cdrip {}\n", env!("CARGO_PKG_VERSION"));

    if let Err(message) = run().await {
        error!("{}", message);
        std::process::exit(1);
    }
}
