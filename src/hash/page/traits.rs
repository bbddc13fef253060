use super::PageId;

pub trait HashPage {
    fn get_pid(&self) -> PageId;

    /// Serialize the page into its on-disk representation, padded to the
    /// configured page size.
    fn get_page_data(&self) -> Vec<u8>;
}
