use std::num::NonZeroU16;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(short, long, default_value = "8088", env = "DROPZONE_PORT")]
    pub port: NonZeroU16,

    #[clap(long, default_value = "127.0.0.1", env = "DROPZONE_HOST")]
    pub host: String,

    #[clap(short, long, default_value = "./artifacts", env = "DROPZONE_ROOT_DIR")]
    pub root_dir: PathBuf,

    /// The only repository (owner/name form) permitted to upload.
    #[clap(short, long, env = "DROPZONE_ALLOWED_REPO")]
    pub allowed_repo: String,
}
