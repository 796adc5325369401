#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("an error occurred with the database connection")]
    Database(#[from] diesel::result::Error),

    #[error("an error occurred getting a database connection")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("an error occurred parsing the file")]
    Csv(#[from] csv::Error),

    #[error("an error occurred serializing a document")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parsing(#[from] ParseError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    NaChain(#[from] NaChainError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// A rule command that failed to evaluate. The affected node is treated as
/// a no-match and the error is surfaced in the per-node list.
#[derive(thiserror::Error, Debug)]
pub enum MappingError {
    #[error("rule {0} has an invalid pattern: {1}")]
    InvalidPattern(String, regex::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("object key declares {key:?} but the event says {event:?}")]
    TaxonomyTypeMismatch { key: String, event: String },

    #[error(transparent)]
    DateFormat(#[from] chrono::ParseError),
}

/// A source descriptor that cannot be resolved into a typed layout.
#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("master layout has no `(node N)` column")]
    MissingNodeLevels,

    #[error("layout has no `(profession)` column")]
    MissingProfession,

    #[error("more than one `(profession)` column: {0} and {1}")]
    DuplicateProfession(String, String),

    #[error("invalid column marker on {0}")]
    InvalidMarker(String),

    #[error("duplicate node level {0}")]
    DuplicateNodeLevel(i32),
}

#[derive(thiserror::Error, Debug)]
pub enum NaChainError {
    #[error("level {0} is outside the hierarchy range 0..={1}")]
    LevelOutOfRange(i32, i32),

    #[error("placeholder chain starts at level {start} which is below the parent level {parent}")]
    InvertedRange { parent: i32, start: i32 },
}

/// Structural invariants. Any of these aborts the load transaction.
#[derive(thiserror::Error, Debug)]
pub enum InvariantError {
    #[error("taxonomy ({0}, {1}) has {2} open versions")]
    OpenVersions(String, String, usize),

    #[error("mapping {0} has {1} open versions")]
    OpenMappingVersions(i64, usize),

    #[error("dictionary entry {0} returned no id on insert or select")]
    DictionaryInsert(String),

    #[error("node {0} would become its own parent")]
    SelfParent(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("cannot find taxonomy in database: ({0}, {1})")]
    Taxonomy(String, String),

    #[error("no active master taxonomy")]
    MasterTaxonomy,

    #[error("{0} active master taxonomies, expected exactly one")]
    AmbiguousMasterTaxonomy(usize),

    #[error("cannot find node in taxonomy ({0}, {1}): {2}")]
    Node(String, String, String),
}
