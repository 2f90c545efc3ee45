use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of index records the header page can hold.
pub const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view of the header page (page 0). The header page is a flat
/// registry of `name -> root_page_id` records, one per named index, and is
/// rewritten through the buffer pool every time an index root moves.
///
/// Names longer than 32 bytes are truncated to their first 32 bytes.
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
    }

    pub fn record_count(&self) -> usize {
        HeaderPageRef::new(self.data).record_count()
    }

    fn set_record_count(&mut self, count: usize) {
        let bytes = (count as u32).to_le_bytes();
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4].copy_from_slice(&bytes);
    }

    /// Appends a record for `name`. Returns false if the name is already
    /// registered or the page is full.
    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> bool {
        if HeaderPageRef::new(self.data).find_record(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(NAME_SIZE);
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + n].copy_from_slice(&name_bytes[..n]);
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_id.as_u32().to_le_bytes());

        self.set_record_count(count + 1);
        true
    }

    /// Rewrites the root id of an existing record. Returns false if `name`
    /// is not registered.
    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match HeaderPageRef::new(self.data).find_record(name) {
            Some(index) => {
                let offset = RECORDS_OFFSET + index * RECORD_SIZE;
                self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
                    .copy_from_slice(&root_id.as_u32().to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Removes the record for `name`, compacting the tail. Returns false
    /// if `name` is not registered.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let count = self.record_count();
        match HeaderPageRef::new(self.data).find_record(name) {
            Some(index) => {
                let start = RECORDS_OFFSET + index * RECORD_SIZE;
                let end = RECORDS_OFFSET + count * RECORD_SIZE;
                self.data.copy_within(start + RECORD_SIZE..end, start);
                self.data[end - RECORD_SIZE..end].fill(0);
                self.set_record_count(count - 1);
                true
            }
            None => false,
        }
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        HeaderPageRef::new(self.data).get_root_id(name)
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

    pub fn record_count(&self) -> usize {
        let bytes: [u8; 4] = self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap();
        u32::from_le_bytes(bytes) as usize
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(NAME_SIZE);
        let mut probe = [0u8; NAME_SIZE];
        probe[..n].copy_from_slice(&name_bytes[..n]);

        (0..self.record_count()).find(|&i| {
            let offset = RECORDS_OFFSET + i * RECORD_SIZE;
            self.data[offset..offset + NAME_SIZE] == probe
        })
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name).map(|index| {
            let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
            let bytes: [u8; 4] = self.data[offset..offset + 4].try_into().unwrap();
            PageId::new(u32::from_le_bytes(bytes))
        })
    }
}
