//! Frame routing
//!
//! Maps a delivered event to the backing array that owns it, the coordinate to
//! write it at, and the name of the layer that displays it. Routing recomputes
//! the plan's axis layout on every call and keeps no state, so any thread can
//! route any event at any time.

use super::planner::{axis_labels, split_active};
use super::{channel_tag, AcquisitionEvent, LayerId, AXIS_CHANNEL, DEFAULT_NAME_PREFIX};
use crate::error::RoutingError;

/// Where a frame goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub layer_id: LayerId,
    /// Index along each plan axis of the layer's array
    pub coordinate: Vec<usize>,
    pub display_name: String,
}

/// Display name of a layer. Surfaces are created and looked up by this name.
pub fn display_name(prefix: &str, layer_id: &LayerId) -> String {
    format!("{}_{}", prefix, layer_id)
}

/// Route `event` using the default name prefix
pub fn route(event: &AcquisitionEvent) -> Result<Route, RoutingError> {
    route_with_prefix(event, DEFAULT_NAME_PREFIX)
}

/// Route `event`; `default_prefix` names layers of plans that are not saved
pub fn route_with_prefix(
    event: &AcquisitionEvent,
    default_prefix: &str,
) -> Result<Route, RoutingError> {
    let plan = &event.sequence;
    let meta = plan
        .stream_meta()
        .map_err(|e| RoutingError::InvalidMetadata(e.to_string()))?
        .ok_or_else(|| RoutingError::ForeignSequence(plan.uid.to_string()))?;

    let mut labels = axis_labels(plan);

    let layer_id = match (&event.channel, split_active(plan, &meta, &labels)) {
        (Some(channel), true) => {
            let ordinal =
                event
                    .resolve(AXIS_CHANNEL)
                    .ok_or_else(|| RoutingError::UnresolvedAxis {
                        axis: AXIS_CHANNEL.to_string(),
                        layer: LayerId::for_sequence(&plan.uid),
                    })?;
            labels.retain(|l| l != AXIS_CHANNEL);
            LayerId::for_channel(&plan.uid, &channel_tag(&channel.config, ordinal))
        }
        _ => LayerId::for_sequence(&plan.uid),
    };

    // Axes the event's own plan never visits (e.g. a grid axis at a position
    // without a grid) sit at 0.
    let coordinate = labels
        .iter()
        .map(|axis| event.resolve(axis).unwrap_or(0))
        .collect();

    let prefix = meta.name_prefix(default_prefix);
    let display_name = display_name(prefix, &layer_id);

    Ok(Route {
        layer_id,
        coordinate,
        display_name,
    })
}
