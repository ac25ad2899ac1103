use halldrive_hardware::FsStore;
use halldrive_traits::KvStore;

#[test]
fn fs_store_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ns = dir.path().join("encR");

    {
        let mut store = FsStore::open(&ns).expect("open store");
        store.put("lut_fwd", &[0, 0, 128, 63]).expect("put");
        store.put("use_fwd", &[1]).expect("put");
    }

    let mut store = FsStore::open(&ns).expect("reopen store");
    assert_eq!(store.get("lut_fwd").unwrap().unwrap(), vec![0, 0, 128, 63]);
    assert_eq!(store.get("use_fwd").unwrap().unwrap(), vec![1]);
    assert!(store.get("lut_rev").unwrap().is_none());
}

#[test]
fn missing_key_is_none_not_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FsStore::open(dir.path().join("encL")).expect("open store");
    assert!(store.get("off_rev").unwrap().is_none());
}
