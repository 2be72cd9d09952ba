//! Drive navigation and selection state

pub mod selection;
pub mod state;

pub use selection::SelectionSet;
pub use state::{
    BaseMode, Crumb, ListingKey, NavigationSnapshot, NavigationState, ViewMode,
    BROWSING_ROOT_LABEL, TRASH_ROOT_LABEL,
};
