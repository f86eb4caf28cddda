/// Derives the heartbeat indicator from push-channel `message`
/// arrivals: the light toggles on every heartbeat, so a stalled channel
/// freezes it. Rendering the blink belongs to the frontend.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    count: u64,
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one heartbeat and returns the indicator state after it.
    pub fn observe(&mut self) -> bool {
        self.count += 1;
        self.is_on()
    }

    pub fn is_on(&self) -> bool {
        self.count % 2 == 0
    }

    pub fn heartbeats(&self) -> u64 {
        self.count
    }
}
