//! Offset/limit pagination over catalog containers.

use std::future::Future;

use crate::error::{Error, Result};

/// Items gathered from a paginated container
#[derive(Debug)]
pub(crate) struct Paged<T> {
    /// Items from every page that loaded, in server order
    pub(crate) items: Vec<T>,
    /// Set when a page after the first failed; earlier items are kept
    pub(crate) interrupted: Option<Error>,
}

/// Fetch pages of `page_size` until the container is exhausted.
///
/// The walk ends on a page shorter than requested. A server that ignores
/// `offset`/`limit` answers with the whole list every time, so a page longer
/// than requested also ends the walk, and a later page that starts with the
/// same item as the page before it is dropped as a repeat.
///
/// A failure on the first page is returned as `Err`. A failure on a later page
/// ends the walk and is reported in [`Paged::interrupted`] alongside the items
/// already gathered. Authentication failures are always returned as `Err`.
pub(crate) async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch_page: F) -> Result<Paged<T>>
where
    T: PartialEq,
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut items: Vec<T> = Vec::new();
    let mut offset = 0;
    let mut last_page_start = 0;

    loop {
        match fetch_page(offset, page_size).await {
            Ok(page) => {
                if offset > 0 && page.first() == items.get(last_page_start) {
                    tracing::debug!(offset, "Page repeats the previous one, offset ignored");
                    return Ok(Paged {
                        items,
                        interrupted: None,
                    });
                }

                let len = page.len();
                last_page_start = items.len();
                items.extend(page);
                if len != page_size {
                    return Ok(Paged {
                        items,
                        interrupted: None,
                    });
                }
                offset += len;
            }
            Err(e) if offset == 0 || e.is_auth_expired() => return Err(e),
            Err(e) => {
                tracing::warn!(offset, error = %e, "Page fetch failed, keeping earlier pages");
                return Ok(Paged {
                    items,
                    interrupted: Some(e),
                });
            }
        }
    }
}
