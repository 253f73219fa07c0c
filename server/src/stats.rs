//! A passive observability sink: counters, rolling averages, and timers,
//! dumped to the log periodically. The core increments into it; nothing
//! else in the simulation ever reads it back.

use std::time::Instant;

const ROLLING_WINDOW: usize = 30;
/// Dump cadence: every 300 ticks, i.e. roughly every 5s at 60Hz.
const DUMP_EVERY_N_TICKS: u64 = 300;

#[derive(Debug, Default)]
struct RollingAverage {
    samples: Vec<f32>,
    next: usize,
}

impl RollingAverage {
    fn push(&mut self, sample: f32) {
        if self.samples.len() < ROLLING_WINDOW {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % ROLLING_WINDOW;
    }

    fn average(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }
}

/// Sixteen named entries mixing monotonic counters, rolling averages, and
/// timers, matching the original's `Stat_Entry` table.
#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    ticks_count: u64,
    tick_times: RollingAverage,
    messages_sent: u64,
    messages_received: u64,
    tick_messages_sent: u64,
    tick_messages_received: u64,
    bytes_sent: u64,
    bytes_received: u64,
    tick_bytes_sent: RollingAverage,
    tick_bytes_received: RollingAverage,
    players_currently: u64,
    players_joined: u64,
    players_left: u64,
    bogus_amogus_messages: u64,
    players_rejected: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            ticks_count: 0,
            tick_times: RollingAverage::default(),
            messages_sent: 0,
            messages_received: 0,
            tick_messages_sent: 0,
            tick_messages_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            tick_bytes_sent: RollingAverage::default(),
            tick_bytes_received: RollingAverage::default(),
            players_currently: 0,
            players_joined: 0,
            players_left: 0,
            bogus_amogus_messages: 0,
            players_rejected: 0,
        }
    }
}

impl Stats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.tick_messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.tick_messages_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_joined(&mut self) {
        self.players_joined += 1;
        self.players_currently += 1;
    }

    pub fn record_left(&mut self) {
        self.players_left += 1;
        self.players_currently = self.players_currently.saturating_sub(1);
    }

    pub fn record_bogus_message(&mut self) {
        self.bogus_amogus_messages += 1;
    }

    pub fn record_rejected(&mut self) {
        self.players_rejected += 1;
    }

    /// Folds this tick's scratch counters into the rolling averages, resets
    /// the per-tick counters, and dumps a log line every `DUMP_EVERY_N_TICKS`.
    pub fn end_tick(&mut self, tick_duration_secs: f32) {
        self.ticks_count += 1;
        self.tick_times.push(tick_duration_secs);
        self.tick_bytes_sent.push(self.bytes_sent as f32);
        self.tick_bytes_received.push(self.bytes_received as f32);

        if self.ticks_count % DUMP_EVERY_N_TICKS == 0 {
            self.dump();
        }

        self.tick_messages_sent = 0;
        self.tick_messages_received = 0;
    }

    fn dump(&self) {
        tracing::info!(
            uptime_secs = self.started_at.elapsed().as_secs_f32(),
            ticks_count = self.ticks_count,
            avg_tick_time_secs = self.tick_times.average(),
            messages_sent = self.messages_sent,
            messages_received = self.messages_received,
            avg_bytes_sent_per_tick = self.tick_bytes_sent.average(),
            avg_bytes_received_per_tick = self.tick_bytes_received.average(),
            players_currently = self.players_currently,
            players_joined = self.players_joined,
            players_left = self.players_left,
            bogus_amogus_messages = self.bogus_amogus_messages,
            players_rejected = self.players_rejected,
            "tick stats",
        );
    }
}
