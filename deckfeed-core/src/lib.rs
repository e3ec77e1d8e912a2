//! Incremental loading of card decks.
//!
//! A deck's [`Index`] is fetched once; its cards are pulled into a
//! [`SparseStore`] in windows, on demand around whatever the viewer looks at
//! and in the background around the reading position, until every card is
//! present.

pub mod config;
pub mod error;
pub mod fixture;
pub mod gap;
pub mod inflight;
pub mod loader;
pub mod location;
pub mod model;
pub mod prefetch;
pub mod provider;
pub mod retry;
pub mod store;
pub mod visibility;

pub use config::{FeedConfig, LoaderConfig, ProviderConfig};
pub use error::{FeedError, Result};
pub use fixture::{FixtureCalls, FixtureDeck, FixtureProvider, FixtureSet};
pub use gap::{Gap, GapFinder};
pub use loader::{DeckLoader, FeedEvent, PrefetchOutcome};
pub use location::{
    FileLocationStore, LocationStore, LocationTracker, MemoryLocationStore, PersistedLocation,
};
pub use model::{
    fragment_for, parse_fragment, AudioTrack, ContentNode, DeckSummary, Index, IndexId,
    IndexMetadata, MediaRefs, NodeId, Sitemap, TocEntry, TransitionHints,
};
pub use prefetch::{PrefetchHandle, PrefetchReport};
pub use provider::{RangeProvider, RangeRequest};
pub use retry::RetryPolicy;
pub use store::SparseStore;
pub use visibility::{
    FrameCallbacks, FrameEvent, SubscriptionToken, VisibilityCallbacks, VisibilityRegistry,
    VisibilitySignal,
};
