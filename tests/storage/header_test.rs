use lumbung::{
    storage::header::DatabaseHeader,
    types::{HEADER_SIZE, PAGE_SIZE, ROOT_PAGE_ID, error::DatabaseError},
};

#[test]
fn test_default_header_describes_fresh_database() {
    let header = DatabaseHeader::default();
    assert_eq!(header.page_size as usize, PAGE_SIZE);
    assert_eq!(header.page_count, 2);
    assert_eq!(header.root_page, ROOT_PAGE_ID);
    assert_eq!(header.freelist_head, 0);
    assert_eq!(header.freelist_count, 0);
    assert_eq!(&header.magic[..7], b"LUMBUNG");
}

#[test]
fn test_header_round_trip() {
    let header = DatabaseHeader {
        file_change_counter: 17,
        page_count: 40,
        freelist_head: 33,
        freelist_count: 3,
        root_page: 12,
        user_version: 7,
        application_id: 0xdead_beef,
        default_cache_size: 64,
        ..DatabaseHeader::default()
    };
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(DatabaseHeader::from_bytes(&bytes).unwrap(), header);
}

#[test]
fn test_fields_are_big_endian() {
    let header = DatabaseHeader {
        page_count: 0x0102,
        ..DatabaseHeader::default()
    };
    let bytes = header.to_bytes();
    assert_eq!(&bytes[16..18], &(PAGE_SIZE as u16).to_be_bytes());
    assert_eq!(&bytes[24..32], &0x0102u64.to_be_bytes());
}

#[test]
fn test_write_into_leaves_rest_of_page() {
    let mut page = vec![0xAAu8; PAGE_SIZE];
    DatabaseHeader::default().write_into(&mut page);
    assert_eq!(
        DatabaseHeader::from_bytes(&page).unwrap(),
        DatabaseHeader::default()
    );
    assert!(page[HEADER_SIZE..].iter().all(|&b| b == 0xAA));
}

#[test]
fn test_rejects_bad_magic() {
    let mut bytes = DatabaseHeader::default().to_bytes();
    bytes[0] = b'X';
    assert!(matches!(
        DatabaseHeader::from_bytes(&bytes),
        Err(DatabaseError::CorruptHeader { .. })
    ));
}

#[test]
fn test_rejects_bad_page_size() {
    let mut bytes = DatabaseHeader::default().to_bytes();
    bytes[16..18].copy_from_slice(&1024u16.to_be_bytes());
    assert!(matches!(
        DatabaseHeader::from_bytes(&bytes),
        Err(DatabaseError::CorruptHeader { .. })
    ));
}

#[test]
fn test_rejects_short_or_inconsistent_header() {
    assert!(DatabaseHeader::from_bytes(&[0u8; 10]).is_err());

    let bad_root = DatabaseHeader {
        root_page: 99,
        ..DatabaseHeader::default()
    };
    assert!(matches!(
        DatabaseHeader::from_bytes(&bad_root.to_bytes()),
        Err(DatabaseError::CorruptHeader { .. })
    ));

    let bad_freelist = DatabaseHeader {
        freelist_count: 2,
        ..DatabaseHeader::default()
    };
    assert!(DatabaseHeader::from_bytes(&bad_freelist.to_bytes()).is_err());
}
