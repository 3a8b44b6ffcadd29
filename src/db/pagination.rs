//! Pagination types for repository queries.

use serde::Serialize;

use crate::{Result, SciError};

/// Request for one page of results. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_number == 0 {
            return Err(SciError::Validation(
                "page number must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SciError::Validation(
                "page size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page_number.saturating_sub(1)) * u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results plus the total row count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_count: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page_number) < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.page_number > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_validate() {
        assert!(PageRequest::new(1, 1).validate().is_ok());
        assert!(matches!(
            PageRequest::new(0, 10).validate(),
            Err(SciError::Validation(_))
        ));
        assert!(matches!(
            PageRequest::new(1, 0).validate(),
            Err(SciError::Validation(_))
        ));
    }

    #[test]
    fn test_page_navigation() {
        let page = Page {
            items: vec![1, 2, 3],
            page_number: 2,
            page_size: 3,
            total_count: 7,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next_page());
        assert!(page.has_previous_page());

        let last = Page {
            items: vec![7],
            page_number: 3,
            page_size: 3,
            total_count: 7,
        };
        assert!(!last.has_next_page());
    }

    #[test]
    fn test_empty_page() {
        let page: Page<i32> = Page {
            items: vec![],
            page_number: 1,
            page_size: 10,
            total_count: 0,
        };
        assert_eq!(page.total_pages(), 0);
        assert!(!page.has_next_page());
        assert!(!page.has_previous_page());
    }
}
