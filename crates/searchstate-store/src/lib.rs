pub mod arch;
pub mod date;
pub mod store;

pub use arch::{ArchContext, ArchNode, ArchPregroups, Pregroup};
pub use store::{
    DynamicFilterDef, FavoriteDef, FavoritePayload, FilterOption, FilterView, NewFavorite,
    OptionView, SearchConfig, SearchStore,
};
