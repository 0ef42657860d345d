use anyhow::Result;
use keeldb::storage::buffer::{BufferPoolError, BufferPoolManager};

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page_ids_are_sequential() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(10)?;

    for expected in 0..3 {
        let (page, page_id) = buffer_pool.new_page()?;
        assert_eq!(page_id, expected);
        assert_eq!(page.read().page_id, page_id);
        assert_eq!(buffer_pool.pin_count(page_id), Some(1));
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_fetch_pins_and_unpin_releases() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(10)?;
    let (_, page_id) = buffer_pool.new_page()?;

    let _again = buffer_pool.fetch_page(page_id)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(2));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    // Never below zero
    buffer_pool.unpin_page(page_id, false)?;
    assert_eq!(buffer_pool.pin_count(page_id), Some(0));

    Ok(())
}

#[test]
fn test_dirty_page_survives_eviction() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(2)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut guard = page.write();
        guard.data[100..109].copy_from_slice(b"Test Data");
    }
    buffer_pool.unpin_page(page_id, true)?;

    // Push the page out of a two-frame pool
    for _ in 0..2 {
        let (_, other) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(other, false)?;
    }
    assert!(!buffer_pool.is_resident(page_id));

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(&fetched.read().data[100..109], b"Test Data");
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_lru_evicts_least_recently_unpinned() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(3)?;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(page_id, false)?;
        ids.push(page_id);
    }

    // Touch the oldest page so the second one becomes the victim
    buffer_pool.fetch_page(ids[0])?;
    buffer_pool.unpin_page(ids[0], false)?;

    let (_, newest) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(newest, false)?;

    assert!(buffer_pool.is_resident(ids[0]));
    assert!(!buffer_pool.is_resident(ids[1]));
    assert!(buffer_pool.is_resident(ids[2]));
    assert!(buffer_pool.is_resident(newest));

    Ok(())
}

#[test]
fn test_pinned_pages_are_never_evicted() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(3)?;

    let mut pinned = Vec::new();
    for _ in 0..3 {
        let (_, page_id) = buffer_pool.new_page()?;
        pinned.push(page_id);
    }
    assert_eq!(buffer_pool.evictable_frames(), 0);
    assert_eq!(buffer_pool.free_frames(), 0);

    assert!(matches!(buffer_pool.new_page(), Err(BufferPoolError::NoFreeFrames)));
    for &page_id in &pinned {
        assert!(buffer_pool.is_resident(page_id));
    }

    // One unpin frees exactly one frame for reuse
    buffer_pool.unpin_page(pinned[1], false)?;
    let (_, page_id) = buffer_pool.new_page()?;
    assert!(!buffer_pool.is_resident(pinned[1]));
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(5)?;
    let (_, page_id) = buffer_pool.new_page()?;

    assert!(matches!(buffer_pool.delete_page(page_id), Err(BufferPoolError::PagePinned(_))));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;
    assert!(!buffer_pool.is_resident(page_id));
    assert!(matches!(buffer_pool.unpin_page(page_id, false), Err(BufferPoolError::PageNotFound(_))));

    // The id is handed out again
    let (_, reused) = buffer_pool.new_page()?;
    assert_eq!(reused, page_id);
    buffer_pool.unpin_page(reused, false)?;

    Ok(())
}

#[test]
fn test_flush_all_pages_persists_across_pools() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("flush.db");

    let page_id = {
        let buffer_pool = BufferPoolManager::new(4, &path)?;
        let (page, page_id) = buffer_pool.new_page()?;
        page.write().data[2000] = 0xAB;
        buffer_pool.unpin_page(page_id, true)?;
        buffer_pool.flush_all_pages()?;
        page_id
    };

    let buffer_pool = BufferPoolManager::new(4, &path)?;
    let page = buffer_pool.fetch_page(page_id)?;
    assert_eq!(page.read().data[2000], 0xAB);
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}
