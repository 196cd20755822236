// High / low pH flags relative to the setpoint band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhDeviation {
    pub high: bool,
    pub low: bool,
}

impl PhDeviation {
    /// Both flags stay off until a reading is available.
    pub fn evaluate(current_ph: Option<f64>, setpoint: f64, band: f64) -> Self {
        match current_ph {
            Some(ph) => Self {
                high: ph > setpoint + band,
                low: ph < setpoint - band,
            },
            None => Self::default(),
        }
    }
}
