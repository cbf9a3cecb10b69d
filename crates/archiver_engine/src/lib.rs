//! Archiver engine: fetching, scripting, image archival, containers and the
//! pipeline that ties them together.
mod config;
mod container;
mod context;
mod decode;
mod enrich;
mod fetch;
mod images;
mod locks;
mod pipeline;
mod props;
mod scripts;
mod site_rules;
mod storage;
mod types;

pub use config::{Clock, EngineConfig, ImageSettings, LinkSettings, ScriptSettings};
pub use container::{
    Container, ContainerError, ContainerReader, ContainerWriter, INDEX_FILE, LOG_FILE, PROPS_FILE,
};
pub use context::{stage, BodySource, DocumentContext};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use enrich::{EnrichedLink, LinkEnricher};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use images::{ArchivedImages, ConversionSlots, ImageArchiver, SlotError};
pub use locks::BookmarkLocks;
pub use pipeline::{
    ArchiveBundle, Archiver, ExtractError, ExtractFailure, ExtractOptions, ExtractOutcome,
    StageError,
};
pub use props::Props;
pub use scripts::{ScriptCache, ScriptEnv, ScriptError, ScriptProgram, ScriptRegistry, ScriptRunner};
pub use site_rules::{load_rules_dir, RuleLoadError, SiteRules};
pub use storage::{ensure_dir, PersistError, StoragePaths};
pub use types::{
    Accept, FailureKind, FetchError, FetchMetadata, FetchOutput, SourceDocument,
};
