//! Startup data pushed to the display before the worker reports anything.

use super::HostContext;
use crate::protocol::HostEnvelope;
use tracing::{info, warn};

/// Emit the saved builds, then one envelope per cached talent tree.
pub(crate) fn emit_startup_data(ctx: &HostContext) {
    match ctx.builds.load_for_display() {
        Ok(builds) => ctx.display(&HostEnvelope::TalentBuildsLoaded { builds }),
        Err(e) => warn!("could not load talent builds: {e:#}"),
    }

    let trees = ctx.trees.scan();
    info!(count = trees.len(), "cached talent trees loaded");
    for t in trees {
        ctx.display(&HostEnvelope::TalentTree {
            class: t.class,
            spec: t.spec,
            tree: t.tree,
        });
    }
}
