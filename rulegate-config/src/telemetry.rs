use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default directives when `RUST_LOG` is unset: scan summaries and
/// shortcircuits at info, per-rule chatter off.
pub const DEFAULT_DIRECTIVES: &str =
    "info,scan::scheduler=info,scan::shortcircuit=info,scan::checker=warn";

/// Install the global subscriber. `RUST_LOG` wins over `default_directives`.
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(default_directives: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directives.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
