//! Many threads hammering the same directories, the way the kernel does
//! when several requests for one directory are in flight.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use memfs::error::FsError;
use memfs::tree::{Directory, NodeKind};

const THREADS: usize = 8;

fn spawn_all<F>(f: F) -> Vec<thread::JoinHandle<Vec<u64>>>
where
    F: Fn(usize) -> Vec<u64> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let barrier = Arc::new(Barrier::new(THREADS));
    (0..THREADS)
        .map(|t| {
            let f = Arc::clone(&f);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                f(t)
            })
        })
        .collect()
}

#[test]
fn concurrent_mkdir_same_name_has_one_winner() {
    for _ in 0..50 {
        let root = Directory::root();
        let r = Arc::clone(&root);
        let handles = spawn_all(move |_| match r.mkdir("x") {
            Ok(d) => vec![d.inode()],
            Err(FsError::AlreadyExists(_)) => vec![],
            Err(e) => panic!("unexpected error: {}", e),
        });
        let winners: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(root.child_count(), 1);
        assert_eq!(root.lookup("x").unwrap().inode(), winners[0]);
    }
}

#[test]
fn concurrent_create_and_mkdir_same_name() {
    for _ in 0..50 {
        let root = Directory::root();
        let r = Arc::clone(&root);
        let handles = spawn_all(move |t| {
            let result = if t % 2 == 0 {
                r.create("clash").map(|f| f.inode())
            } else {
                r.mkdir("clash").map(|d| d.inode())
            };
            result.into_iter().collect()
        });
        let winners: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(root.list_children().len(), 1);
    }
}

#[test]
fn concurrent_creates_get_unique_inodes() {
    let root = Directory::root();
    let r = Arc::clone(&root);
    let handles = spawn_all(move |t| {
        (0..200)
            .map(|i| r.create(&format!("f-{}-{}", t, i)).unwrap().inode())
            .collect()
    });

    let mut seen = HashSet::new();
    for h in handles {
        for ino in h.join().unwrap() {
            assert!(seen.insert(ino), "inode {} issued twice", ino);
        }
    }
    assert_eq!(seen.len(), THREADS * 200);
    assert_eq!(root.child_count(), THREADS * 200);
}

#[test]
fn concurrent_mixed_operations_stay_consistent() {
    let root = Directory::root();
    let shared = root.mkdir("shared").unwrap();
    let s = Arc::clone(&shared);
    let handles = spawn_all(move |t| {
        let mut created = Vec::new();
        for i in 0..300 {
            let name = format!("n{}", (t + i) % 16);
            match i % 5 {
                0 => {
                    if let Ok(f) = s.create(&name) {
                        created.push(f.inode());
                    }
                }
                1 => {
                    if let Ok(d) = s.mkdir(&name) {
                        created.push(d.inode());
                    }
                }
                2 => {
                    let _ = s.remove(&name, i % 2 == 0);
                }
                3 => {
                    let listing = s.list_children();
                    let names: HashSet<&str> = listing.iter().map(|e| e.name.as_str()).collect();
                    assert_eq!(names.len(), listing.len(), "listing saw a duplicate name");
                }
                _ => {
                    let _ = s.lookup(&name);
                }
            }
        }
        created
    });

    let mut issued = HashSet::new();
    for h in handles {
        for ino in h.join().unwrap() {
            assert!(issued.insert(ino), "inode {} issued twice", ino);
        }
    }

    let listing = shared.list_children();
    let names: HashSet<&str> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names.len(), listing.len());
    for entry in &listing {
        assert!(issued.contains(&entry.inode));
        let node = shared.lookup(&entry.name).unwrap();
        assert_eq!(node.inode(), entry.inode);
        assert_eq!(node.kind(), entry.kind);
    }
    let files = listing.iter().filter(|e| e.kind == NodeKind::File).count();
    assert!(listing[..files].iter().all(|e| e.kind == NodeKind::File));
}

#[test]
fn sibling_directories_do_not_block_each_other() {
    let root = Directory::root();
    let dirs: Vec<Arc<Directory>> = (0..THREADS)
        .map(|i| root.mkdir(&format!("d{}", i)).unwrap())
        .collect();
    let dirs = Arc::new(dirs);
    let d = Arc::clone(&dirs);
    let handles = spawn_all(move |t| {
        let dir = &d[t];
        for i in 0..500 {
            dir.create(&format!("f{}", i)).unwrap();
        }
        for i in (0..500).step_by(2) {
            dir.remove(&format!("f{}", i), false).unwrap();
        }
        vec![dir.child_count() as u64]
    });
    for h in handles {
        assert_eq!(h.join().unwrap(), vec![250]);
    }
    let total: usize = dirs.iter().map(|d| d.child_count()).sum();
    assert_eq!(total, THREADS * 250);
}
