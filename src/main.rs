use telescope_align::prelude::*;

fn main() -> Result<()> {
    // Demo stub: simulates a six-plane telescope and aligns it in memory
    env_logger::init();
    let planes = (0..6)
        .map(|i| Plane::new(i, i as f64 * 150.0, Resolution::uniform(0.004)))
        .collect();
    let geometry = Geometry::new(planes)?;

    let events = TestBeam::new(
        &geometry,
        TestBeamParams {
            events: 200,
            ..Default::default()
        },
    );
    let mut aligner = Aligner::new(geometry, AlignParams::default())?;
    let mut sink = RecordCollector::new();
    let report = aligner.run(events, &mut sink)?;
    println!(
        "tracks={} records={} latency_ms={:.3}",
        report.tracks_accepted, report.records, report.timings.total_ms
    );
    Ok(())
}
