pub const APP_NAME: &str = "dbbundle";

/// PostgreSQL release packaged when no version is given on the command line.
pub const DEFAULT_POSTGRES_VERSION: &str = "17.5";

/// Base URL of the PostgreSQL source tarball mirror.
pub const POSTGRES_SOURCE_BASE_URL: &str = "https://ftp.postgresql.org/pub/source";

/// Extension of every uploaded object.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Name of the bundled shared library directory inside a bundle.
pub const BUNDLE_LIB_DIR: &str = "lib";

/// Number of build log lines carried in a compile error.
pub const COMPILE_LOG_TAIL_LINES: usize = 40;

/// Value is 315532800 = January 1, 1980 00:00:00 UTC (ZIP epoch)
pub const SOURCE_DATE_EPOCH: &str = "315532800";

pub const MACOS_MIN_VERSION_ARM64: &str = "11.0";
pub const MACOS_MIN_VERSION_X86_64: &str = "10.15";

/// Prefix of the environment variables credentials are read from.
pub const CREDENTIALS_ENV_PREFIX: &str = "DBBUNDLE_S3_";

pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Matrix used by `dbbundle matrix` when no file is given.
pub const DEFAULT_MATRIX_JSON: &str = include_str!("config/default_matrix.json");
