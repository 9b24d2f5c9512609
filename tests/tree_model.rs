//! Randomised operation sequences checked against a simple reference model.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use memfs::error::FsError;
use memfs::tree::{Directory, Node, NodeKind, ROOT_INODE};

const NAMES: [&str; 6] = ["a", "b", "c", "d.txt", "e.txt", "f"];

#[derive(Debug, Clone, Copy)]
enum Op {
    Create(&'static str),
    Mkdir(&'static str),
    Remove(&'static str, bool),
}

fn random_op(rng: &mut StdRng) -> Op {
    let name = NAMES[rng.gen_range(0..NAMES.len())];
    match rng.gen_range(0..3) {
        0 => Op::Create(name),
        1 => Op::Mkdir(name),
        _ => Op::Remove(name, rng.gen_bool(0.5)),
    }
}

/// Replays an operation log: name -> (kind, inode).
#[derive(Default)]
struct Model {
    entries: BTreeMap<String, (NodeKind, u64)>,
}

impl Model {
    fn apply(&mut self, dir: &Directory, op: Op) {
        match op {
            Op::Create(name) | Op::Mkdir(name) => {
                let kind = match op {
                    Op::Create(_) => NodeKind::File,
                    _ => NodeKind::Directory,
                };
                let result = match kind {
                    NodeKind::File => dir.create(name).map(Node::from),
                    NodeKind::Directory => dir.mkdir(name).map(Node::from),
                };
                if self.entries.contains_key(name) {
                    assert!(
                        matches!(result, Err(FsError::AlreadyExists(_))),
                        "{:?} should collide",
                        op
                    );
                } else {
                    let node = result.unwrap_or_else(|e| panic!("{:?} failed: {}", op, e));
                    assert_eq!(node.kind(), kind);
                    self.entries.insert(name.to_string(), (kind, node.inode()));
                }
            }
            Op::Remove(name, is_dir) => {
                let want = if is_dir { NodeKind::Directory } else { NodeKind::File };
                let result = dir.remove(name, is_dir);
                match self.entries.get(name) {
                    Some((kind, inode)) if *kind == want => {
                        let node = result.unwrap_or_else(|e| panic!("{:?} failed: {}", op, e));
                        assert_eq!(node.inode(), *inode);
                        self.entries.remove(name);
                    }
                    _ => assert!(
                        matches!(result, Err(FsError::NotFound(_))),
                        "{:?} should be NotFound",
                        op
                    ),
                }
            }
        }
    }

    fn check(&self, dir: &Directory) {
        let listing = dir.list_children();
        assert_eq!(listing.len(), self.entries.len());

        let mut seen = HashSet::new();
        for entry in &listing {
            assert!(seen.insert(entry.name.clone()), "duplicate name {}", entry.name);
            let (kind, inode) = self.entries[&entry.name];
            assert_eq!(entry.kind, kind);
            assert_eq!(entry.inode, inode);
        }

        // Files are listed before directories.
        let first_dir = listing
            .iter()
            .position(|e| e.kind == NodeKind::Directory)
            .unwrap_or(listing.len());
        assert!(listing[first_dir..].iter().all(|e| e.kind == NodeKind::Directory));

        for name in NAMES {
            match (self.entries.get(name), dir.lookup(name)) {
                (Some((kind, inode)), Ok(node)) => {
                    assert_eq!(node.kind(), *kind);
                    assert_eq!(node.inode(), *inode);
                }
                (None, Err(FsError::NotFound(_))) => {}
                (expected, got) => panic!("lookup({}) expected {:?}, got {:?}", name, expected, got),
            }
        }
    }
}

#[test]
fn random_sequences_match_model() {
    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let root = Directory::root();
        let mut model = Model::default();
        for _ in 0..200 {
            let op = random_op(&mut rng);
            model.apply(&root, op);
            model.check(&root);
        }
    }
}

#[test]
fn count_is_creates_minus_removes() {
    let mut rng = StdRng::seed_from_u64(7);
    let root = Directory::root();
    let mut created = 0usize;
    let mut removed = 0usize;
    for _ in 0..500 {
        match random_op(&mut rng) {
            Op::Create(n) => {
                if root.create(n).is_ok() {
                    created += 1;
                }
            }
            Op::Mkdir(n) => {
                if root.mkdir(n).is_ok() {
                    created += 1;
                }
            }
            Op::Remove(n, is_dir) => {
                if root.remove(n, is_dir).is_ok() {
                    removed += 1;
                }
            }
        }
        assert_eq!(root.child_count(), created - removed);
        assert_eq!(root.list_children().len(), created - removed);
    }
}

fn subtree_inodes(dir: &Directory) -> Vec<u64> {
    let mut out = vec![dir.inode()];
    for child in dir.children() {
        match child {
            Node::Directory(d) => out.extend(subtree_inodes(&d)),
            file => out.push(file.inode()),
        }
    }
    out
}

/// Builds a random tree and checks that every live inode is unique.
#[test]
fn inodes_unique_across_tree() {
    let mut rng = StdRng::seed_from_u64(42);
    let root = Directory::root();
    let mut dirs: Vec<Arc<Directory>> = vec![Arc::clone(&root)];
    let mut issued = HashSet::new();
    issued.insert(ROOT_INODE);

    for i in 0..2000 {
        let parent = Arc::clone(&dirs[rng.gen_range(0..dirs.len())]);
        let name = format!("n{}", rng.gen_range(0..20));
        match rng.gen_range(0..4) {
            0 => {
                if let Ok(f) = parent.create(&name) {
                    assert!(issued.insert(f.inode()), "inode {} reused", f.inode());
                }
            }
            1 => {
                if let Ok(d) = parent.mkdir(&name) {
                    assert!(issued.insert(d.inode()), "inode {} reused", d.inode());
                    dirs.push(d);
                }
            }
            2 => {
                let _ = parent.remove(&name, false);
            }
            _ => {
                if let Ok(Node::Directory(gone)) = parent.remove(&name, true) {
                    let gone: HashSet<u64> = subtree_inodes(&gone).into_iter().collect();
                    dirs.retain(|d| !gone.contains(&d.inode()));
                }
            }
        }

        if i % 250 == 0 {
            let live = subtree_inodes(&root);
            let unique: HashSet<u64> = live.iter().copied().collect();
            assert_eq!(live.len(), unique.len());
        }
    }
}

#[test]
fn nested_scenario() {
    let root = Directory::root();
    let a = root.mkdir("a").unwrap();
    let file = a.create("b.txt").unwrap();

    let found = a.lookup("b.txt").unwrap();
    assert_eq!(found.kind(), NodeKind::File);
    assert_eq!(found.inode(), file.inode());
    assert!(matches!(root.lookup("b.txt"), Err(FsError::NotFound(_))));

    a.remove("b.txt", false).unwrap();
    assert!(matches!(a.lookup("b.txt"), Err(FsError::NotFound(_))));
    assert!(a.list_children().is_empty());
}

#[test]
fn file_size_follows_payload() {
    let root = Directory::root();
    let file = root.create("data.bin").unwrap();
    let attr = root.lookup("data.bin").unwrap().attributes();
    assert_eq!(attr.size, 0);
    assert_eq!(attr.kind, NodeKind::File);

    file.set_data(vec![7u8; 1234]);
    let attr = root.lookup("data.bin").unwrap().attributes();
    assert_eq!(attr.size, 1234);
    assert_eq!(attr.inode, file.inode());
}
