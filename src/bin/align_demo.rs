use log::info;
use telescope_align::config::{load_config, RunConfig};
use telescope_align::io::{create_mille_file, load_events, write_json_file};
use telescope_align::sim::TestBeam;
use telescope_align::{
    Aligner, AlignmentSink, EventHits, Geometry, RecordCollector, RunHeader, RunReport,
};
use std::env;
use std::path::Path;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_config(Path::new(&config_path))?;
    let (geometry, params) = config.resolve().map_err(|e| e.to_string())?;

    let events = read_events(&config, &geometry)?;
    let header = RunHeader {
        run_number: events.first().map_or(1, |e| e.run_number),
        geometry_id: config.geometry_id.unwrap_or_default(),
    };

    let mut aligner = Aligner::new(geometry, params).map_err(|e| e.to_string())?;
    aligner.begin_run(&header).map_err(|e| e.to_string())?;

    match &config.output.mille_binary {
        Some(path) => {
            let mut writer = create_mille_file(path)?;
            process(&mut aligner, &events, &mut writer)?;
            writer.flush().map_err(|e| e.to_string())?;
            println!(
                "Wrote {} tracks to {} ({} records dropped)",
                writer.tracks_written(),
                path.display(),
                writer.records_dropped()
            );
        }
        None => {
            let mut collector = RecordCollector::new();
            process(&mut aligner, &events, &mut collector)?;
            println!(
                "Collected {} tracks ({} records) in memory",
                collector.tracks().len(),
                collector.record_count()
            );
        }
    }

    print_text_summary(aligner.report());
    println!("  fixed labels: {:?}", aligner.fixed_labels());

    if let Some(path) = &config.output.report_json {
        write_json_file(path, aligner.report())?;
        println!("Wrote run report JSON to {}", path.display());
    }
    Ok(())
}

fn usage() -> String {
    "Usage: align_demo <config.json>".to_string()
}

fn read_events(config: &RunConfig, geometry: &Geometry) -> Result<Vec<EventHits>, String> {
    if let Some(path) = &config.input {
        let events = load_events(path)?;
        info!("loaded {} events from {}", events.len(), path.display());
        return Ok(events);
    }
    let params = config.simulation.clone().unwrap_or_default();
    info!(
        "simulating {} events with seed {}",
        params.events, params.seed
    );
    Ok(TestBeam::new(geometry, params).collect())
}

fn process(
    aligner: &mut Aligner,
    events: &[EventHits],
    sink: &mut dyn AlignmentSink,
) -> Result<(), String> {
    aligner
        .run(events, sink)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn print_text_summary(report: &RunReport) {
    println!("Alignment summary ({:?})", report.mode);
    println!(
        "  events: processed={} skipped={}",
        report.events_processed, report.events_skipped
    );
    println!(
        "  candidates: {} (truncated events: {})",
        report.candidates, report.truncated_events
    );
    println!(
        "  tracks: fitted={} accepted={} cut={} non_converged={} failed={}",
        report.tracks_fitted,
        report.tracks_accepted,
        report.rejected_by_cuts,
        report.non_converged,
        report.fit_failures
    );
    println!(
        "  data points: {} records: {}{}",
        report.data_points,
        report.records,
        if report.ceiling_reached {
            " (track ceiling reached)"
        } else {
            ""
        }
    );
    println!(
        "  chi2: mean={:.3} rms={:.3}",
        report.chi2.mean, report.chi2.rms
    );

    println!("\nResiduals per plane (mean / rms)");
    for plane in &report.planes {
        println!(
            "  sensor {:>3}: n={:<6} x={:+.5}/{:.5} y={:+.5}/{:.5}",
            plane.sensor_id,
            plane.x.count,
            plane.x.mean,
            plane.x.rms,
            plane.y.mean,
            plane.y.rms
        );
    }

    let stages: Vec<String> = report
        .timings
        .stages
        .iter()
        .map(|s| format!("{}={:.3}", s.label, s.elapsed_ms))
        .collect();
    println!(
        "\nTimings (ms): {} total={:.3}",
        stages.join(" "),
        report.timings.total_ms
    );
}
