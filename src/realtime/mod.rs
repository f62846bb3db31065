// Live table views: pure reducer, store adapters and the collection handle
pub mod collection;
pub mod reducer;
pub mod store;
pub mod supabase;

pub use collection::{CollectionState, RealtimeCollection, SubscribeOptions};
pub use reducer::{apply_event, apply_events, SAFETY_CEILING};
pub use store::{Filter, MemoryStore, OrderBy, Query, RemoteStore, Subscription};
pub use supabase::SupabaseStore;
