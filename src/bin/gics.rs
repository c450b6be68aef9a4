use clap::{Parser, Subcommand};
use gics::{
    pack_with_telemetry, verify, BlockHealth, Decoder, PackOptions, RecoveryQuality, Snapshot,
    UnpackOptions,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gics", version = "1.3.0", about = "The .gics time-series container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a JSON array of snapshots into a .gics file
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Encrypt with AES-256-GCM
        #[arg(short, long)]
        password: Option<String>,
        /// Segment size limit in bytes, before a new segment is started
        #[arg(long)]
        segment_size_limit: Option<usize>,
        /// Print per-stream CHM telemetry after packing
        #[arg(long)]
        verbose: bool,
    },
    /// Unpack a .gics file back into a JSON array of snapshots
    Unpack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Re-check every hash and CRC without materializing snapshots
    Verify {
        input: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Show file envelope and schema metadata
    Info {
        input: PathBuf,
    },
    /// Index-bypass recovery scan: assess segment health without requiring
    /// the EOS trailer or any segment hash to validate
    Scan {
        input: PathBuf,
        /// Print per-segment health log
        #[arg(long)]
        verbose: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Pack ─────────────────────────────────────────────────────────
        Commands::Pack { input, output, password, segment_size_limit, verbose } => {
            let raw = std::fs::read(&input)?;
            let snapshots: Vec<Snapshot> = serde_json::from_slice(&raw)?;
            let n_snapshots = snapshots.len();

            let mut options = PackOptions::new();
            options.password = password;
            if let Some(limit) = segment_size_limit {
                options.segment_size_limit = limit;
            }

            let (bytes, telemetry) = pack_with_telemetry(snapshots, options)?;
            std::fs::write(&output, &bytes)?;

            println!("Packed {} snapshot(s) → {} ({} B)", n_snapshots, output.display(), bytes.len());
            if verbose {
                println!();
                println!("── CHM telemetry ────────────────────────────────────────");
                for stream in &telemetry.streams {
                    println!(
                        "  stream {:>3}: core {}/{} B, quarantine {}/{} B, {} anomaly segment(s)",
                        stream.stream_id,
                        stream.stats.core_output_bytes,
                        stream.stats.core_input_bytes,
                        stream.stats.quar_output_bytes,
                        stream.stats.quar_input_bytes,
                        stream.report.anomaly_segments.len(),
                    );
                    for seg in &stream.report.anomaly_segments {
                        println!(
                            "      anomaly @block {}..{:?}: {:?} ({} probe attempt(s), {} success(es))",
                            seg.start_block, seg.end_block, seg.reason, seg.probe_attempts, seg.probe_successes,
                        );
                    }
                }
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────
        Commands::Unpack { input, output, password } => {
            let bytes = std::fs::read(&input)?;
            let mut options = UnpackOptions::new();
            options.password = password;
            let snapshots = gics::unpack(bytes, options)?;
            let json = serde_json::to_vec_pretty(&snapshots)?;
            std::fs::write(&output, json)?;
            println!("Unpacked {} snapshot(s) → {}", snapshots.len(), output.display());
        }

        // ── Verify ───────────────────────────────────────────────────────
        Commands::Verify { input, password } => {
            let bytes = std::fs::read(&input)?;
            let mut options = UnpackOptions::new();
            options.password = password;
            if verify(bytes, options) {
                println!("OK: {} passes strict integrity verification", input.display());
            } else {
                println!("FAILED: {} does not pass strict integrity verification", input.display());
                std::process::exit(1);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let bytes = std::fs::read(&input)?;
            let file_size = bytes.len();
            let decoder = Decoder::new(bytes, UnpackOptions::new());
            let header = decoder.parse_header()?;
            let schema = decoder.get_schema()?;

            println!("── .gics file ───────────────────────────────────────────");
            println!("  Path             {}", input.display());
            println!("  File size        {} B", file_size);
            println!("  Format version   {}", header.version);
            println!("  Encrypted        {}", header.is_encrypted());
            println!("  Has schema       {}", header.has_schema());
            println!("  Stream count     {}", header.stream_count);
            println!("  Schema profile   {} (v{})", schema.profile_id, schema.version);
            println!("  Item id kind     {:?}", schema.item_id_kind);
            println!("  Schema fields    {}", schema.fields.len());
            for field in &schema.fields {
                println!("    {} ({:?})", field.name, field.field_type);
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────
        Commands::Scan { input, verbose } => {
            let report = gics::scan_file(&input)?;
            println!("── Index-bypass recovery scan ───────────────────────────");
            println!("  {}", report.summary());
            println!("  Segments scanned:      {}", report.total_scanned);
            println!("  Healthy segments:      {}", report.healthy_segments);
            println!("  Corrupt segments:      {}", report.corrupt_segments);
            println!("  Truncated segments:    {}", report.truncated_segments);
            println!("  Unknown codec:         {}", report.unknown_codec_segments);
            println!("  Quality:               {:?}", report.quality);

            if matches!(report.quality, RecoveryQuality::Catastrophic) {
                println!();
                println!("  File header could not be located at all.");
            }

            if verbose {
                println!();
                println!("  ── Segment log ──────────────────────────────────────");
                for (i, sb) in report.block_log.iter().enumerate() {
                    let status = match &sb.health {
                        BlockHealth::Healthy => "\u{2713} healthy".to_string(),
                        BlockHealth::HeaderCorrupt => "\u{2717} header corrupt".to_string(),
                        BlockHealth::TruncatedPayload { declared, available } => {
                            format!("\u{26a0} truncated ({declared} declared, {available} available)")
                        }
                        BlockHealth::UnknownOuterCodec { codec } => format!("? unknown outer codec {codec}"),
                    };
                    println!(
                        "  [{i:4}] @{:10}  segment={:?}  {status}",
                        sb.file_offset, sb.segment_id
                    );
                }
            }
        }
    }

    Ok(())
}
