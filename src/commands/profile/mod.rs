mod budget;
mod run;

pub use run::run;
pub(crate) use run::{build_and_cache_profiles, load_cached_profiles, ProfileOptions};
