// Writes a synthetic scanned reel plus a project file for manual end-to-end runs:
//
//   synth_frames --out /tmp/reel --count 48
//   reel-stabilizer --config /tmp/reel/reel-stabilizer.toml process --project /tmp/reel/project.toml

use std::path::PathBuf;

use clap::Parser;

use reel_stabilizer::{
    config::{Config, CustomTemplateSettings, ProjectConfig},
    frames::{OutputNaming, Point, SyntheticReel},
    templates::TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "synth_frames", about = "Write a synthetic 8mm scan with known jitter")]
struct Args {
    /// Output folder; frames go to `<out>/scan`, processed frames to `<out>/out`
    #[arg(short, long)]
    out: PathBuf,

    /// Number of frames
    #[arg(short, long, default_value_t = 48)]
    count: usize,

    /// Absolute number of the first frame
    #[arg(long, default_value_t = 1)]
    first: u32,

    /// Largest jitter in pixels along either axis
    #[arg(long, default_value_t = 4)]
    amplitude: i32,
}

/// Repeatable jitter that visits every offset in `-amplitude..=amplitude`
fn jitter(i: usize, amplitude: i32) -> Point {
    let span = (2 * amplitude + 1).max(1) as usize;
    let x = ((i * 3) % span) as i32 - amplitude;
    let y = ((i * 5 + 2) % span) as i32 - amplitude;
    Point::new(x, y)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let scan_dir = args.out.join("scan");
    std::fs::create_dir_all(&scan_dir)?;

    println!("🎞️  Writing {} synthetic frames to {}", args.count, scan_dir.display());
    let reel = SyntheticReel::default();
    let jitters: Vec<Point> = (0..args.count).map(|i| jitter(i, args.amplitude)).collect();
    reel.write_sequence(&scan_dir, &OutputNaming::new("picture-", 5, "png"), args.first, &jitters)?;

    // Pattern cut from an unjittered frame, so every frame is pulled back to it
    let region = reel.hole_region(6);
    TemplateRegistry::new(&scan_dir).capture_custom(
        &reel.render(Point::new(0, 0)),
        region,
        200,
        scan_dir.join("custom.png"),
    )?;

    let mut project = ProjectConfig {
        source_dir: scan_dir.clone(),
        target_dir: args.out.join("out"),
        file_pattern: "picture-*.png".to_string(),
        ..ProjectConfig::default()
    };
    project.stabilization.enabled = true;
    project.stabilization.custom_template = Some(CustomTemplateSettings {
        path: PathBuf::from("custom.png"),
        expected: region.top_left,
    });
    let project_path = args.out.join("project.toml");
    project.save_to_file(&project_path)?;

    // No stock patterns next to a synthetic reel
    let mut config = Config::default();
    config.templates.verify_integrity = false;
    let config_path = args.out.join("reel-stabilizer.toml");
    config.save_to_file(&config_path)?;

    println!("📁 Project: {}", project_path.display());
    println!("📁 Config:  {}", config_path.display());
    Ok(())
}
