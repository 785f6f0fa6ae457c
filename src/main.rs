use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, process};

use anyhow::Context;
use nif2scene::logging::{init_logging, level_from_name};
use nif2scene::pipeline::{DecodePool, DecodeResult, ModelOutput, decode_and_convert};
use nif2scene::settings::{Settings, load_settings};

const RESULT_TIMEOUT: Duration = Duration::from_secs(300);

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let settings_path = match args.last() {
        Some(last) if last.ends_with(".json") => args.pop().map(PathBuf::from),
        _ => None,
    };
    if args.is_empty() {
        eprintln!("Usage: nif2scene <input.nif>... [settings.json]");
        process::exit(2);
    }

    let settings = match settings_path {
        Some(path) => load_settings(&path)?,
        None => Settings::default(),
    };
    init_logging(level_from_name(&settings.log_level));
    let options = settings.pipeline_options();

    if let [input] = args.as_slice() {
        let input = PathBuf::from(input);
        let bytes = read_model(&input)?;
        let output = decode_and_convert(&identifier_for(&input), &bytes, &options)
            .with_context(|| format!("failed to decode {}", input.display()))?;
        print_summary(&output);
        return Ok(());
    }

    let pool = DecodePool::new(settings.workers, options).context("failed to start decode pool")?;
    log::info!("decoding {} files on {} workers", args.len(), pool.worker_count());
    for (request_id, input) in args.iter().enumerate() {
        let input = PathBuf::from(input);
        let bytes = read_model(&input)?;
        pool.submit(request_id as u64, identifier_for(&input), bytes);
    }

    let mut results: Vec<DecodeResult> = Vec::with_capacity(args.len());
    while results.len() < args.len() {
        let result = pool
            .recv_timeout(RESULT_TIMEOUT)
            .context("timed out waiting for decode results")?;
        results.push(result);
    }
    results.sort_by_key(|result| result.request_id);

    let mut failures = 0;
    for result in results {
        match result.result {
            Ok(output) => print_summary(&output),
            Err(error) => {
                failures += 1;
                eprintln!("{}: {error}", result.identifier);
            }
        }
        println!();
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} files failed to decode", args.len());
    }
    Ok(())
}

fn read_model(input: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(input).with_context(|| format!("failed to read model: {}", input.display()))
}

fn identifier_for(input: &Path) -> String {
    input.to_string_lossy().replace('\\', "/")
}

fn print_summary(output: &ModelOutput) {
    let scene = &output.scene;
    let bones: usize = output.rigs.iter().map(|rig| rig.skeleton.bones.len()).sum();
    let triangles: usize = scene.meshes.iter().map(|mesh| mesh.triangle_count()).sum();

    println!("Model: {} (version {})", output.identifier, output.version);
    println!("Records: {}", output.record_count);
    println!(
        "Nodes: {}, Meshes: {} ({} triangles), Materials: {}",
        scene.nodes.len(),
        scene.meshes.len(),
        triangles,
        scene.materials.len()
    );
    println!("Skinned meshes: {}, Bones: {}", output.rigs.len(), bones);
    println!(
        "Clips: {}",
        output
            .animations
            .clips
            .iter()
            .map(|clip| format!("{} ({:.2}s)", clip.name, clip.duration()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    match &output.collision_shape {
        Some(shape) => println!(
            "Collision: {:?} via {:?} ({} boxes)",
            shape.shape.kind(),
            shape.decided_by,
            scene.collision.boxes.len()
        ),
        None => println!("Collision: none ({} boxes)", scene.collision.boxes.len()),
    }
    if output.simplified_meshes > 0 {
        println!("Simplified meshes: {}", output.simplified_meshes);
    }
    println!("Issues: {}", output.issues.len());
    for issue in &output.issues {
        println!("  [{:?}] {}: {}", issue.severity, issue.code, issue.message);
    }
}
