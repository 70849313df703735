/// Host clocks fed to the timeslicer each frame.
#[derive(Debug, Clone)]
pub struct Time {
    /// Scaled clock; stands still while `time_scale == 0`.
    pub t_sec: f64,
    pub unscaled_t_sec: f64,
    pub frame_index: u64,
    pub time_scale: f64,
}

impl Time {
    pub fn new(time_scale: f64) -> Self {
        Self {
            t_sec: 0.0,
            unscaled_t_sec: 0.0,
            frame_index: 0,
            time_scale: sanitize_scale(time_scale),
        }
    }

    pub fn advance(&mut self, real_dt_sec: f64) {
        let dt = real_dt_sec.max(0.0);
        self.unscaled_t_sec += dt;
        self.t_sec += dt * self.time_scale;
        self.frame_index += 1;
    }
}

fn sanitize_scale(scale: f64) -> f64 {
    if scale.is_finite() {
        scale.max(0.0)
    } else {
        1.0
    }
}
