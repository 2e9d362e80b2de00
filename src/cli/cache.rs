use tabled::Table;

use crate::{
    cache::CacheKey,
    config::Settings,
    error, success,
    types::CacheTableRow,
    warning,
};

pub async fn list_cache(settings: &Settings) {
    let service = super::open_service(settings).await;
    let cache = service.cache();
    let entries = cache.snapshot();

    if entries.is_empty() {
        warning!("Cache at {} is empty.", settings.cache.dir.display());
        return;
    }

    let rows: Vec<CacheTableRow> = entries
        .into_iter()
        .map(|e| CacheTableRow {
            key: e.key.to_string(),
            state: e.state.to_string(),
            size: super::format_bytes(e.size),
            readers: e.readers,
            last_access: e.last_access.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect();

    println!("{}", Table::new(rows));
    println!(
        "{} of {} used",
        super::format_bytes(cache.ready_bytes()),
        super::format_bytes(settings.cache.max_bytes)
    );
}

pub async fn sweep_cache(settings: &Settings) {
    let service = super::open_service(settings).await;
    let report = service.cache().sweep().await;
    success!(
        "Evicted {} entries ({}), {} of {} in use.",
        report.evicted.len(),
        super::format_bytes(report.freed),
        super::format_bytes(report.remaining),
        super::format_bytes(settings.cache.max_bytes)
    );
}

pub async fn purge_cache(settings: &Settings, key: &str) {
    let Some(key) = CacheKey::from_file_stem(key) else {
        error!("'{}' is not a cache key.", key);
    };

    let service = super::open_service(settings).await;
    match service.cache().remove(&key).await {
        Ok(true) => success!("Removed {}.", key),
        Ok(false) => warning!("{} is not cached.", key),
        Err(e) => error!("Cannot remove {}. Err: {}", key, e),
    }
}
