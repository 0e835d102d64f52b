// Scheduler that fires immediately and records every requested delay
use parking_lot::Mutex;
use region_client::{ScheduledTask, Scheduler};
use std::time::Duration;

#[derive(Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        self.delays.lock().push(delay);
        task();
    }
}
