//! Benchmark utilities.

use dirsync_engine::AttributeMap;
use dirsync_ldif::{Modification, Record};
use rand::Rng;

/// Generate random binary data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` member DNs.
pub fn members(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| format!("uid=user{:06},ou=people,dc=example,dc=org", i).into_bytes())
        .collect()
}

/// A group entry with `count` members.
pub fn group(count: usize) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("objectClass", vec![b"top".to_vec(), b"groupOfUniqueNames".to_vec()]);
    attrs.insert("cn", vec![b"staff".to_vec()]);
    attrs.insert("uniqueMember", members(count));
    attrs
}

/// A person entry with a binary photo of `photo_size` bytes.
pub fn person(n: usize, photo_size: usize) -> AttributeMap {
    let mut attrs = AttributeMap::new();
    attrs.insert("objectClass", vec![b"top".to_vec(), b"person".to_vec()]);
    attrs.insert("cn", vec![format!("user{}", n).into_bytes()]);
    attrs.insert("sn", vec![b"Bench".to_vec()]);
    attrs.insert("mail", vec![format!("user{}@example.org", n).into_bytes()]);
    attrs.insert("jpegPhoto", vec![random_data(photo_size)]);
    attrs
}

/// Generate a mix of add, modify and delete records.
pub fn records(count: usize, photo_size: usize) -> Vec<Record> {
    (0..count)
        .map(|n| {
            let dn = format!("cn=user{},ou=people,dc=example,dc=org", n);
            match n % 3 {
                0 => Record::add(dn, person(n, photo_size).to_attributes()),
                1 => Record::modify(
                    dn,
                    vec![Modification::replace("mail", vec![format!("u{}@example.org", n).into_bytes()])],
                ),
                _ => Record::delete(dn),
            }
        })
        .collect()
}
