//! Rules for the local user's own status writes.

use backend_api::{Profile, ProfilePatch};

/// Location label written while location sharing is off.
pub const GHOST_MODE: &str = "Ghost Mode";
/// Location label written when location sharing is switched back on.
pub const LIVE_ON_MAP: &str = "Live on Map";

/// Patch written when the privacy toggle changes. Turning sharing off clears
/// the position; turning it on re-sends whatever position we still hold.
pub fn sharing_patch(enabled: bool, current: &Profile) -> ProfilePatch {
    if enabled {
        ProfilePatch {
            location_sharing: Some(true),
            location: Some(Some(LIVE_ON_MAP.into())),
            coordinates: current.coordinates.map(Some),
            ..Default::default()
        }
    } else {
        ProfilePatch {
            location_sharing: Some(false),
            location: Some(Some(GHOST_MODE.into())),
            coordinates: Some(None),
            ..Default::default()
        }
    }
}

/// While sharing is off, a patch that carries a position without also
/// setting the privacy flag loses its position and location label.
pub fn guard_location(sharing_enabled: bool, mut patch: ProfilePatch) -> ProfilePatch {
    let sets_position = matches!(patch.coordinates, Some(Some(_)));
    if !sharing_enabled && sets_position && patch.location_sharing.is_none() {
        patch.coordinates = None;
        patch.location = None;
    }
    patch
}
