use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Largest request served from size classes. Fixed by the size class tiers.
const MAX_BYTES: usize = 256 * 1024;

#[derive(Deserialize, Default)]
struct ConfigSection {
    page_shift: Option<u32>,
    max_pages: Option<usize>,
    slow_start_step: Option<usize>,
    min_batch: Option<usize>,
    max_batch: Option<usize>,
    bootstrap_chunk_size: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    page_shift: u32,
    page_size: usize,
    max_pages: usize,
    slow_start_step: usize,
    min_batch: usize,
    max_batch: usize,
    bootstrap_chunk_size: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let page_shift = cfg.page_shift.unwrap_or(13);
    assert!(
        (12..=16).contains(&page_shift),
        "page_shift ({}) must be in 12..=16",
        page_shift
    );
    let page_size = 1usize << page_shift;

    let max_pages = cfg.max_pages.unwrap_or(128);
    let slow_start_step = cfg.slow_start_step.unwrap_or(3);
    let min_batch = cfg.min_batch.unwrap_or(2);
    let max_batch = cfg.max_batch.unwrap_or(512);
    let bootstrap_chunk_size = cfg.bootstrap_chunk_size.unwrap_or(128 * 1024);

    assert!(slow_start_step > 0, "slow_start_step must be > 0");
    assert!(min_batch >= 2, "min_batch ({}) must be >= 2", min_batch);
    assert!(
        max_batch >= min_batch,
        "max_batch ({}) must be >= min_batch ({})",
        max_batch,
        min_batch
    );
    assert!(
        bootstrap_chunk_size >= page_size,
        "bootstrap_chunk_size ({}) must be at least one page ({})",
        bootstrap_chunk_size,
        page_size
    );

    // The largest size class moves `min_batch` objects per batch; its span
    // has to fit in a bucket.
    let largest_span = (min_batch * MAX_BYTES).div_ceil(page_size);
    assert!(
        max_pages >= largest_span,
        "max_pages ({}) must be >= {} to hold a batch of the largest size class",
        max_pages,
        largest_span
    );

    ResolvedConfig {
        page_shift,
        page_size,
        max_pages,
        slow_start_step,
        min_batch,
        max_batch,
        bootstrap_chunk_size,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/tcalloc.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const PAGE_SHIFT: usize = {};\n\
         pub const PAGE_SIZE: usize = {};\n\
         pub const MAX_PAGES: usize = {};\n\
         pub const SLOW_START_STEP: usize = {};\n\
         pub const MIN_BATCH: usize = {};\n\
         pub const MAX_BATCH: usize = {};\n\
         pub const BOOTSTRAP_CHUNK_SIZE: usize = {};\n",
        cfg.page_shift,
        cfg.page_size,
        cfg.max_pages,
        cfg.slow_start_step,
        cfg.min_batch,
        cfg.max_batch,
        cfg.bootstrap_chunk_size,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=TCALLOC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("TCALLOC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve_config(&config.config);

    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
