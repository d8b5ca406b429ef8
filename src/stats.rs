use crate::model::VehicleReport;

/// Why a raw vehicle record was left out of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingVehicleId,
    MissingPosition,
    /// Position present but outside WGS84 bounds.
    OutOfRange,
}

/// Per-snapshot record counts and optional-field coverage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotStats {
    pub raw_records: usize,
    pub valid: usize,

    // rejections
    pub missing_vehicle_id: usize,
    pub missing_position: usize,
    pub out_of_range: usize,

    // optional fields among valid records
    pub with_heading: usize,
    pub with_speed: usize,
    pub with_route: usize,
    pub with_trip: usize,
    pub with_next_stop: usize,
    pub with_msg_time: usize,
}

impl SnapshotStats {
    pub fn record_valid(&mut self, v: &VehicleReport) {
        self.raw_records += 1;
        self.valid += 1;

        if v.heading.is_some() {
            self.with_heading += 1;
        }

        if v.speed_mph.is_some() {
            self.with_speed += 1;
        }

        if v.route_short_name.is_some() {
            self.with_route += 1;
        }

        if v.trip_id.is_some() {
            self.with_trip += 1;
        }

        if v.next_stop_id.is_some() || v.next_stop_name.is_some() {
            self.with_next_stop += 1;
        }

        if v.reported_at.is_some() {
            self.with_msg_time += 1;
        }
    }

    pub fn record_rejected(&mut self, reason: Rejection) {
        self.raw_records += 1;
        match reason {
            Rejection::MissingVehicleId => self.missing_vehicle_id += 1,
            Rejection::MissingPosition => self.missing_position += 1,
            Rejection::OutOfRange => self.out_of_range += 1,
        }
    }

    pub fn dropped(&self) -> usize {
        self.raw_records - self.valid
    }

    fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of valid records that name a route, in percent.
    pub fn route_pct(&self) -> f64 {
        Self::pct(self.with_route, self.valid)
    }
}
