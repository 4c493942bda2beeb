use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tokio::{sync::mpsc, task::JoinHandle, time};

use crate::SessionEvent;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Parses the backend's timestamps, which may or may not carry an offset.
/// Naive values are taken as UTC.
pub(crate) fn parse_iso_utc(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub(crate) enum TickOutcome {
    Stale,
    Stopped,
    Advanced(DateTime<Utc>),
}

/// Locally interpolated simulation clock. The server remains authoritative:
/// every `reset` replaces the held time wholesale and restarts the ticker
/// under a new generation, so ticks queued by a superseded ticker are
/// discarded instead of double-advancing the clock.
pub(crate) struct LocalClock {
    sim_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

impl LocalClock {
    pub(crate) fn new() -> Self {
        Self {
            sim_time: None,
            end_time: None,
            generation: 0,
            ticker: None,
        }
    }

    pub(crate) fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub(crate) fn set_end_time(&mut self, end_time: Option<DateTime<Utc>>) {
        self.end_time = end_time;
    }

    /// Replaces the held time. `Some` restarts the one-second ticker,
    /// `None` leaves the clock stopped.
    pub(crate) fn reset(
        &mut self,
        sim_time: Option<DateTime<Utc>>,
        queue: &mpsc::UnboundedSender<SessionEvent>,
    ) {
        self.stop();
        self.sim_time = sim_time;
        if sim_time.is_none() {
            return;
        }
        let generation = self.generation;
        let queue = queue.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = time::interval(TICK_INTERVAL);
            // The first interval tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if queue
                    .send(SessionEvent::ClockTick { generation })
                    .is_err()
                {
                    break;
                }
            }
        }));
    }

    pub(crate) fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.generation += 1;
    }

    /// Advances the held time by one second. Ticks from superseded tickers
    /// are reported as stale; an unrepresentable new time stops the clock
    /// rather than ticking on corrupt state.
    pub(crate) fn apply_tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation || self.ticker.is_none() {
            return TickOutcome::Stale;
        }
        let advanced = self
            .sim_time
            .and_then(|held| held.checked_add_signed(TimeDelta::seconds(1)));
        match advanced {
            Some(next) => {
                self.sim_time = Some(next);
                TickOutcome::Advanced(next)
            }
            None => {
                self.stop();
                self.sim_time = None;
                TickOutcome::Stopped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_offset_and_naive_timestamps() {
        let with_offset = parse_iso_utc("2025-05-01T12:30:00+00:00").expect("offset form");
        let naive = parse_iso_utc("2025-05-01T12:30:00").expect("naive form");
        let fractional = parse_iso_utc("2025-05-01T12:30:00.250000").expect("fractional form");
        assert_eq!(with_offset, naive);
        assert_eq!(
            fractional,
            Utc.with_ymd_and_hms(2025, 5, 1, 12, 30, 0).unwrap()
                + TimeDelta::milliseconds(250)
        );
        assert!(parse_iso_utc("yesterday-ish").is_none());
        assert!(parse_iso_utc("").is_none());
    }

    #[tokio::test]
    async fn reset_supersedes_previous_ticker_generation() {
        let (queue, mut events) = mpsc::unbounded_channel();
        let mut clock = LocalClock::new();
        let first = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        clock.reset(Some(first), &queue);
        let stale_generation = clock.generation;

        let second = Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap();
        clock.reset(Some(second), &queue);

        assert!(matches!(
            clock.apply_tick(stale_generation),
            TickOutcome::Stale
        ));
        match clock.apply_tick(clock.generation) {
            TickOutcome::Advanced(next) => {
                assert_eq!(next, second + TimeDelta::seconds(1));
            }
            _ => panic!("expected the live generation to advance"),
        }
        events.close();
    }

    #[tokio::test]
    async fn overflow_stops_the_clock() {
        let (queue, mut events) = mpsc::unbounded_channel();
        let mut clock = LocalClock::new();
        clock.reset(Some(DateTime::<Utc>::MAX_UTC), &queue);

        assert!(matches!(
            clock.apply_tick(clock.generation),
            TickOutcome::Stopped
        ));
        assert!(clock.sim_time.is_none());
        assert!(clock.ticker.is_none());
        events.close();
    }

    #[tokio::test]
    async fn reset_to_none_leaves_clock_stopped() {
        let (queue, mut events) = mpsc::unbounded_channel();
        let mut clock = LocalClock::new();
        clock.reset(
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()),
            &queue,
        );
        clock.reset(None, &queue);

        assert!(clock.ticker.is_none());
        assert!(matches!(
            clock.apply_tick(clock.generation),
            TickOutcome::Stale
        ));
        events.close();
    }
}
