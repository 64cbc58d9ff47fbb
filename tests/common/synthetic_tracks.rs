use telescope_align::{EventHits, Geometry, Hit, Plane, Resolution};

/// Evenly spaced planes with a uniform resolution.
pub fn telescope(planes: usize, spacing: f64, resolution: f64) -> Geometry {
    assert!(planes > 0, "telescope needs at least one plane");
    let planes = (0..planes)
        .map(|i| Plane::new(i as i32, i as f64 * spacing, Resolution::uniform(resolution)))
        .collect();
    Geometry::new(planes).expect("valid telescope geometry")
}

/// Hit of the line `x = x0 + ax * z`, `y = y0 + ay * z` on every plane.
pub fn straight_track(geometry: &Geometry, x0: f64, ax: f64, y0: f64, ay: f64) -> Vec<Hit> {
    geometry
        .planes()
        .iter()
        .map(|p| Hit::new(x0 + ax * p.z, y0 + ay * p.z, p.z))
        .collect()
}

/// Event with one hit per plane from `track`, skipping the listed planes.
pub fn single_track_event(event_number: u64, track: &[Hit], empty_planes: &[usize]) -> EventHits {
    let planes = track
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            if empty_planes.contains(&i) {
                Vec::new()
            } else {
                vec![*hit]
            }
        })
        .collect();
    EventHits::new(1, event_number, planes)
}

/// Event holding every track's hit on every plane, track order preserved.
pub fn multi_track_event(event_number: u64, tracks: &[Vec<Hit>]) -> EventHits {
    let planes = tracks.first().map_or(0, Vec::len);
    let planes = (0..planes)
        .map(|p| tracks.iter().map(|t| t[p]).collect())
        .collect();
    EventHits::new(1, event_number, planes)
}
