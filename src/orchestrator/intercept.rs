//! Host-side handling of build-string saves.
//!
//! These commands mutate a file the host owns, so they never reach the worker.

use super::HostContext;
use crate::protocol::{BuildEntry, HostEnvelope};
use tracing::{info, warn};

/// Handle `line` if it belongs to the build-save family. Returns false otherwise.
pub(crate) fn try_intercept(ctx: &HostContext, line: &str) -> bool {
    if !BuildEntry::matches(line) {
        return false;
    }

    let entry = match BuildEntry::parse(line) {
        Ok(e) => e,
        Err(e) => {
            warn!("ignoring build save: {e}");
            return true;
        }
    };

    if let Err(e) = ctx.builds.save(&entry) {
        warn!(path = %ctx.builds.path().display(), "build save failed: {e:#}");
        return true;
    }
    info!(class = %entry.class, spec = %entry.spec, build_type = %entry.build_type, "build string saved");

    ctx.display(&HostEnvelope::BuildStringSaved {
        class: entry.class,
        spec: entry.spec,
        build_type: entry.build_type,
    });
    true
}
