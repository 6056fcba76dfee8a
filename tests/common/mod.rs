//! Shared fixtures: a small regtest header tree and helpers to open registries on it.
//!
//! ```text
//!                                            - M <- N <- X <- Y <- Z
//!                                          /
//!                             - G <- H <- I <- J <- K <- L
//!                           /
//! A <- B <- C <- D <- E <- F <- O <- P <- Q <- R <- S <- T <- U
//! ```
#![allow(dead_code)]

use bitcoin::{hashes::Hash, BlockHash, TxMerkleNode};
use headerchain::{ChainId, Config, ConnectOutcome, Header, Network, Registry, Target};
use tempfile::TempDir;

/// (label, height, raw header hex)
const TREE: &[(char, u32, &str)] = &[
    ('A', 0, "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4adae5494dffff7f2002000000"),
    ('B', 1, "0000002006226e46111a0b59caaf126043eb5bbf28c34f3a5e332a1fc7b2b73cf188910f186c8dfd970a4545f79916bc1d75c9d00432f57c89209bf3bb115b7612848f509c25f45bffff7f2000000000"),
    ('C', 2, "00000020686bdfc6a3db73d5d93e8c9663a720a26ecb1ef20eb05af11b36cdbc57c19f7ebf2cbf153013a1c54abaf70e95198fcef2f3059cc6b4d0f7e876808e7d24d11cc825f45bffff7f2000000000"),
    ('D', 3, "00000020122baa14f3ef54985ae546d1611559e3f487bd2a0f46e8dbb52fbacc9e237972e71019d7feecd9b8596eca9a67032c5f4641b23b5d731dc393e37de7f9c2f299e725f45bffff7f2000000000"),
    ('E', 4, "00000020f8016f7ef3a17d557afe05d4ea7ab6bde1b2247b7643896c1b63d43a1598b747a3586da94c71753f27c075f57f44faf913c31177a0957bbda42e7699e3a2141aed25f45bffff7f2001000000"),
    ('F', 5, "000000201d589c6643c1d121d73b0573e5ee58ab575b8fdf16d507e7e915c5fbfbbfd05e7aee1d692d1615c3bdf52c291032144ce9e3b258a473c17c745047f3431ff8e2ee25f45bffff7f2000000000"),
    ('O', 6, "00000020b833ed46eea01d4c980f59feee44a66aa1162748b6801029565d1466790c405c3a141ce635cbb1cd2b3a4fcdd0a3380517845ba41736c82a79cab535d31128066526f45bffff7f2001000000"),
    ('P', 7, "00000020abe8e119d1877c9dc0dc502d1a253fb9a67967c57732d2f71ee0280e8381ff0a9690c2fe7c1a4450c74dc908fe94dd96c3b0637d51475e9e06a78e944a0c7fe28126f45bffff7f2000000000"),
    ('Q', 8, "000000202ce41d94eb70e1518bc1f72523f84a903f9705d967481e324876e1f8cf4d3452148be228a4c3f2061bafe7efdfc4a8d5a94759464b9b5c619994d45dfcaf49e1a126f45bffff7f2000000000"),
    ('R', 9, "00000020552755b6c59f3d51e361d16281842a4e166007799665b5daed86a063dd89857415681cb2d00ff889193f6a68a93f5096aeb2d84ca0af6185a462555822552221a626f45bffff7f2000000000"),
    ('S', 10, "00000020a13a491cbefc93cd1bb1938f19957e22a134faf14c7dee951c45533e2c750f239dc087fc977b06c24a69c682d1afd1020e6dc1f087571ccec66310a786e1548fab26f45bffff7f2000000000"),
    ('T', 11, "00000020dbf3a9b55dfefbaf8b6e43a89cf833fa2e208bbc0c1c5d76c0d71b9e4a65337803b243756c25053253aeda309604363460a3911015929e68705bd89dff6fe064b026f45bffff7f2002000000"),
    ('U', 12, "000000203d0932b3b0c78eccb39a595a28ae4a7c966388648d7783fd1305ec8d40d4fe5fd67cb902a7d807cee7676cb543feec3e053aa824d5dfb528d5b94f9760313d9db726f45bffff7f2001000000"),
    ('G', 6, "00000020b833ed46eea01d4c980f59feee44a66aa1162748b6801029565d1466790c405c3a141ce635cbb1cd2b3a4fcdd0a3380517845ba41736c82a79cab535d31128066928f45bffff7f2001000000"),
    ('H', 7, "00000020e19e687f6e7f83ca394c114144dbbbc4f3f9c9450f66331a125413702a2e1a719690c2fe7c1a4450c74dc908fe94dd96c3b0637d51475e9e06a78e944a0c7fe26a28f45bffff7f2002000000"),
    ('I', 8, "0000002009dcb3b158293c89d7cf7ceeb513add122ebc3880a850f47afbb2747f5e48c54148be228a4c3f2061bafe7efdfc4a8d5a94759464b9b5c619994d45dfcaf49e16a28f45bffff7f2000000000"),
    ('J', 9, "000000206a65f3bdd3374a5a6c4538008ba0b0a560b8566291f9ef4280ab877627a1742815681cb2d00ff889193f6a68a93f5096aeb2d84ca0af6185a462555822552221c928f45bffff7f2000000000"),
    ('K', 10, "00000020bb3b421653548991998f96f8ba486b652fdb07ca16e9cee30ece033547cd1a6e9dc087fc977b06c24a69c682d1afd1020e6dc1f087571ccec66310a786e1548fca28f45bffff7f2000000000"),
    ('L', 11, "00000020c391d74d37c24a130f4bf4737932bdf9e206dd4fad22860ec5408978eb55d46303b243756c25053253aeda309604363460a3911015929e68705bd89dff6fe064ca28f45bffff7f2000000000"),
    ('M', 9, "000000206a65f3bdd3374a5a6c4538008ba0b0a560b8566291f9ef4280ab877627a1742815681cb2d00ff889193f6a68a93f5096aeb2d84ca0af6185a4625558225522214229f45bffff7f2000000000"),
    ('N', 10, "00000020383dab38b57f98aa9b4f0d5ff868bc674b4828d76766bf048296f4c45fff680a9dc087fc977b06c24a69c682d1afd1020e6dc1f087571ccec66310a786e1548f4329f45bffff7f2003000000"),
    ('X', 11, "0000002067f1857f54b7fef732cb4940f7d1b339472b3514660711a820330fd09d8fba6b03b243756c25053253aeda309604363460a3911015929e68705bd89dff6fe0649b29f45bffff7f2002000000"),
    ('Y', 12, "00000020db33c9768a9e5f7c37d0f09aad88d48165946c87d08f7d63793f07b5c08c527fd67cb902a7d807cee7676cb543feec3e053aa824d5dfb528d5b94f9760313d9d9b29f45bffff7f2000000000"),
    ('Z', 13, "0000002047822b67940e337fda38be6f13390b3596e4dea2549250256879722073824e7f0f2596c29203f8a0f71ae94193092dc8f113be3dbee4579f1e649fa3d6dcc38c622ef45bffff7f2003000000"),
];

/// Hex of the header with the given label.
pub fn raw(label: char) -> &'static str {
    TREE.iter()
        .find(|(l, _, _)| *l == label)
        .map(|(_, _, raw)| *raw)
        .unwrap_or_else(|| panic!("no fixture header {label}"))
}

/// Header with the given label.
pub fn h(label: char) -> Header {
    let (_, height, _) = TREE.iter().find(|(l, _, _)| *l == label).unwrap();
    Header::from_hex(raw(label), *height).unwrap()
}

/// Hash of the header with the given label.
pub fn hash(label: char) -> BlockHash {
    h(label).block_hash()
}

pub fn regtest(dir: &TempDir) -> Config {
    Config::new(dir.path(), Network::Regtest)
}

pub fn open(dir: &TempDir) -> Registry {
    Registry::open(regtest(dir)).unwrap()
}

/// Connect each labelled header to `chain`, asserting success.
pub fn append(reg: &mut Registry, chain: ChainId, labels: &str) {
    for label in labels.chars() {
        let outcome = reg.connect(chain, h(label)).unwrap();
        assert_eq!(outcome, ConnectOutcome::Connected, "header {label}");
    }
}

/// Size in bytes of the file backing `chain`.
pub fn file_len(reg: &Registry, chain: ChainId) -> u64 {
    std::fs::metadata(reg.chain(chain).unwrap().store().path())
        .unwrap()
        .len()
}

/// Number of files in the forks directory.
pub fn fork_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("forks")).unwrap().count()
}

/// Mine a regtest header on top of `prev` at `height`; `salt` varies the merkle root.
pub fn mine(prev: BlockHash, height: u32, salt: u32) -> Header {
    let limit = Network::Regtest.params().pow_limit;
    mine_with(prev, height, salt, limit.to_compact(), 1_600_000_000 + height * 90)
}

/// Mine a header with explicit `bits` and `time`.
pub fn mine_with(prev: BlockHash, height: u32, salt: u32, bits: u32, time: u32) -> Header {
    let mut merkle = [0u8; 32];
    merkle[..4].copy_from_slice(&salt.to_le_bytes());
    merkle[4..8].copy_from_slice(&height.to_le_bytes());
    let mut header = Header {
        version: 0x2000_0000,
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::from_byte_array(merkle),
        time,
        bits,
        nonce: 0,
        height,
    };
    let target = Target::from_compact(bits).unwrap();
    while !target.is_met_by(&header.block_hash()) {
        header.nonce += 1;
    }
    header
}
