//! Random extend/fork sequences must leave a consistent fork tree that survives a reopen.
mod common;

use common::{append, mine, open};
use headerchain::prelude::*;
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    /// Mine on top of the picked chain.
    Extend(usize),
    /// Fork the picked chain this many headers below its tip.
    Fork(usize, u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<usize>().prop_map(Op::Extend),
        1 => (any::<usize>(), 0u32..3).prop_map(|(c, d)| Op::Fork(c, d)),
    ]
}

fn apply(reg: &mut Registry, ops: &[Op]) -> anyhow::Result<()> {
    let mut salt = 0;
    for op in ops {
        salt += 1;
        let chains = reg.chains();
        match *op {
            Op::Extend(pick) => {
                let id = chains[pick % chains.len()];
                let tip = reg.tip_height(id)?.unwrap_or_default();
                let prev = reg.hash_at(id, tip)?.unwrap();
                let outcome = reg.connect(id, mine(prev, tip + 1, salt))?;
                assert_eq!(outcome, ConnectOutcome::Connected);
            }
            Op::Fork(pick, depth) => {
                let id = chains[pick % chains.len()];
                let tip = reg.tip_height(id)?.unwrap_or_default();
                let height = tip.saturating_sub(depth).max(1);
                let prev = reg.hash_at(id, height - 1)?.unwrap();
                reg.fork(id, mine(prev, height, salt))?;
            }
        }
    }
    Ok(())
}

fn check_tree(reg: &Registry) -> anyhow::Result<()> {
    let best = reg.best_chain();
    let best_work = reg.chainwork(best)?;
    assert_eq!(reg.parent(best)?, None);

    for id in reg.chains() {
        let chain = reg.chain(id)?;
        let fp = chain.forkpoint();
        assert!(reg.chainwork(id)? <= best_work);
        assert_eq!(
            std::fs::metadata(chain.store().path())?.len(),
            80 * u64::from(reg.branch_size(id)?)
        );

        assert_eq!(reg.hash_at(id, fp)?, Some(chain.forkpoint_hash()));

        if let Some(parent) = reg.parent(id)? {
            assert!(reg.chainwork(parent)? >= reg.chainwork(id)?);
            assert!(reg.tip_height(parent)?.is_some_and(|t| t + 1 >= fp));
            assert_eq!(reg.hash_at(parent, fp - 1)?, Some(chain.prev_hash()));
            assert_ne!(reg.hash_at(parent, fp)?, Some(chain.forkpoint_hash()));
        }

        let tip = reg.tip_height(id)?.unwrap_or_default();
        for height in fp.max(1)..=tip {
            let header = reg.header_at(id, height)?.unwrap();
            assert_eq!(reg.hash_at(id, height - 1)?, Some(header.prev_blockhash));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn tree_stays_consistent(ops in prop::collection::vec(op(), 1..16)) {
        let dir = TempDir::new().unwrap();
        let (best_hash, count) = {
            let mut reg = open(&dir);
            let root = reg.best_chain();
            append(&mut reg, root, "ABCDEF");
            apply(&mut reg, &ops).unwrap();
            check_tree(&reg).unwrap();
            let best = reg.best_chain();
            let tip = reg.tip_height(best).unwrap().unwrap();
            (reg.hash_at(best, tip).unwrap(), reg.chains().len())
        };

        let reg = open(&dir);
        check_tree(&reg).unwrap();
        let best = reg.best_chain();
        let tip = reg.tip_height(best).unwrap().unwrap();
        prop_assert_eq!(reg.hash_at(best, tip).unwrap(), best_hash);
        prop_assert_eq!(reg.chains().len(), count);
    }
}
