//! Console log format for the simulator.
//!
//! Every line carries the wall clock, the simulated clock and the component
//! that logged it:
//!
//! ```text
//! 14:02:11.532 +   2.048s mesh-node-3      DEBUG Peer link up peer=02:00:00:00:00:02
//! ```

use std::fmt;
use std::fmt::Write as _;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COMPONENT_WIDTH: usize = 16;
const LEVEL_WIDTH: usize = 5;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_BLUE: &str = "\x1b[34m";

/// Simulated time shared between the simulation and the log formatter
#[derive(Debug, Clone, Default)]
pub struct SimClock(Arc<AtomicU64>);

impl SimClock {
    pub fn set(&self, now: Duration) {
        self.0.store(now.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> Duration {
        Duration::from_micros(self.0.load(Ordering::Relaxed))
    }
}

/// Log with a `component` field, shown in the component column
#[macro_export]
macro_rules! mesh_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! mesh_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! mesh_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

pub struct MeshLogFormatter {
    default_component: String,
    clock: SimClock,
    ansi: bool,
}

impl MeshLogFormatter {
    /// Colored when stderr is a terminal
    pub fn new(default_component: String, clock: SimClock) -> Self {
        Self {
            default_component,
            clock,
            ansi: stderr_supports_ansi(),
        }
    }

    pub fn plain(default_component: String, clock: SimClock) -> Self {
        Self {
            default_component,
            clock,
            ansi: false,
        }
    }

    fn component_column(&self, component: Option<&str>) -> String {
        let name = component
            .map(|component| format!("mesh-{}", component))
            .unwrap_or_else(|| self.default_component.clone());
        if name.chars().count() <= COMPONENT_WIDTH {
            return format!("{:<width$}", name, width = COMPONENT_WIDTH);
        }
        let mut cut: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
        cut.push('…');
        cut
    }

    fn sim_time_column(&self) -> String {
        let now = self.clock.get();
        format!("+{:>4}.{:03}s", now.as_secs(), now.subsec_millis())
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.ansi {
            code
        } else {
            ""
        }
    }
}

/// Label and color of a level
fn level_style(level: &Level) -> (&'static str, &'static str) {
    match *level {
        Level::ERROR => ("ERROR", "\x1b[1;31m"),
        Level::WARN => ("WARN", "\x1b[33m"),
        Level::INFO => ("INFO", "\x1b[32m"),
        Level::DEBUG => ("DEBUG", "\x1b[36m"),
        Level::TRACE => ("TRACE", "\x1b[90m"),
    }
}

impl<S, N> FormatEvent<S, N> for MeshLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let (label, color) = level_style(event.metadata().level());
        let reset = self.paint(ANSI_RESET);

        write!(
            writer,
            "{}{}{} {}{}{} {} {}{:<width$}{} ",
            self.paint(ANSI_DIM),
            chrono::Local::now().format("%H:%M:%S%.3f"),
            reset,
            self.paint(ANSI_BLUE),
            self.sim_time_column(),
            reset,
            self.component_column(fields.component.as_deref()),
            self.paint(color),
            label,
            reset,
            width = LEVEL_WIDTH
        )?;
        writeln!(writer, "{}{}", fields.message, fields.extra)
    }
}

/// Message, component and remaining `key=value` pairs of an event
#[derive(Default)]
struct EventFields {
    message: String,
    component: Option<String>,
    extra: String,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "component" => self.component = Some(value),
            key => {
                let _ = write!(self.extra, " {}={}", key, value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

fn stderr_supports_ansi() -> bool {
    let dumb = std::env::var("TERM").is_ok_and(|term| term == "dumb");
    !dumb && std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> MeshLogFormatter {
        MeshLogFormatter::plain("mesh-sim".to_string(), SimClock::default())
    }

    #[test]
    fn test_component_column() {
        let formatter = formatter();
        assert_eq!(formatter.component_column(None), "mesh-sim        ");
        assert_eq!(formatter.component_column(Some("node-3")), "mesh-node-3     ");
        let long = formatter.component_column(Some("a-very-long-component"));
        assert_eq!(long.chars().count(), COMPONENT_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_sim_time_follows_clock() {
        let clock = SimClock::default();
        let formatter = MeshLogFormatter::plain("mesh-sim".to_string(), clock.clone());
        assert_eq!(formatter.sim_time_column(), "+   0.000s");
        clock.set(Duration::from_micros(2_048_900));
        assert_eq!(clock.get(), Duration::from_micros(2_048_900));
        assert_eq!(formatter.sim_time_column(), "+   2.048s");
    }

    #[test]
    fn test_plain_has_no_escapes() {
        let formatter = formatter();
        assert_eq!(formatter.paint(ANSI_RESET), "");
        assert_eq!(level_style(&Level::WARN).0, "WARN");
    }
}
