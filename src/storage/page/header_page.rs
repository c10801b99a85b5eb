use crate::common::{MarmotError, PageId, Result, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x4D41524D; // "MARM"
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const RECORD_COUNT_OFFSET: usize = 8;
const RECORDS_OFFSET: usize = 12;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4; // name + root page id
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// The header page lives at page 0 and stores a directory of
/// (index name, root page id) records. Every index registers itself here
/// and rewrites its record whenever its root changes, so a restart can
/// find the roots again.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
        self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        self.data[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&VERSION.to_le_bytes());
        self.set_record_count(0);
    }

    pub fn is_valid(&self) -> bool {
        let magic = u32::from_le_bytes(self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4].try_into().unwrap());
        magic == MAGIC_NUMBER
    }

    pub fn record_count(&self) -> u32 {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    fn set_record_count(&mut self, count: u32) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&count.to_le_bytes());
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = Self::record_offset(index);
        let raw = &self.data[offset..offset + NAME_SIZE];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &raw[..end]
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        (0..self.record_count() as usize).find(|&i| self.name_at(i) == name.as_bytes())
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let offset = Self::record_offset(index);
        let name_bytes = name.as_bytes();
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name_bytes.len()].copy_from_slice(name_bytes);
        self.data[offset + NAME_SIZE..offset + NAME_SIZE + 4]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
    }

    /// Registers a new (name, root) record. Errors if the name is already
    /// present, too long, or the page is out of slots.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        if name.len() >= NAME_SIZE {
            return Err(MarmotError::IndexCorrupted(format!(
                "index name too long: {name}"
            )));
        }
        if self.find_record(name).is_some() {
            return Err(MarmotError::IndexCorrupted(format!(
                "index {name} already registered"
            )));
        }
        let count = self.record_count() as usize;
        if count >= MAX_RECORDS {
            return Err(MarmotError::HeaderFull);
        }
        self.write_record(count, name, root_page_id);
        self.set_record_count(count as u32 + 1);
        Ok(())
    }

    /// Rewrites the root page id of an existing record.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        match self.find_record(name) {
            Some(index) => {
                self.write_record(index, name, root_page_id);
                Ok(())
            }
            None => Err(MarmotError::IndexNotFound(name.to_string())),
        }
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| {
            let offset = Self::record_offset(index) + NAME_SIZE;
            PageId::new(u32::from_le_bytes(
                self.data[offset..offset + 4].try_into().unwrap(),
            ))
        })
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn is_valid(&self) -> bool {
        let magic = u32::from_le_bytes(self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4].try_into().unwrap());
        magic == MAGIC_NUMBER
    }

    pub fn record_count(&self) -> u32 {
        u32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        for index in 0..self.record_count() as usize {
            let offset = HeaderPage::record_offset(index);
            let raw = &self.data[offset..offset + NAME_SIZE];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            if &raw[..end] == name.as_bytes() {
                let root_offset = offset + NAME_SIZE;
                return Some(PageId::new(u32::from_le_bytes(
                    self.data[root_offset..root_offset + 4].try_into().unwrap(),
                )));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_page_init() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.is_valid());
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_root_id("missing"), None);
    }

    #[test]
    fn test_header_page_insert_and_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        header.insert_record("primary", PageId::new(7)).unwrap();
        assert_eq!(header.get_root_id("primary"), Some(PageId::new(7)));

        header.update_record("primary", PageId::new(12)).unwrap();
        assert_eq!(header.get_root_id("primary"), Some(PageId::new(12)));
        assert_eq!(header.record_count(), 1);
    }

    #[test]
    fn test_header_page_duplicate_insert_rejected() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        header.insert_record("idx", PageId::new(1)).unwrap();
        assert!(header.insert_record("idx", PageId::new(2)).is_err());
    }

    #[test]
    fn test_header_page_update_missing_fails() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);
        header.init();

        assert!(header.update_record("nope", PageId::new(3)).is_err());
    }
}
