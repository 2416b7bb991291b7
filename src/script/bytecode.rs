//! 脚本的打包格式
//!
//! `.jsxb` 文件只是压缩后的源码，不含引擎字节码：4 字节魔数 + 1 字节
//! 格式版本 + deflate 压缩的源码文本。加载时解码回源码，再由各上下文
//! 各自编译，所以省下的只是体积，不是编译时间。

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::core::{BinderError, BinderResult};

const MAGIC: &[u8; 4] = b"JSXB";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1;

/// 编码源码
pub fn encode(source: &str) -> BinderResult<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_LEN + source.len() / 2);
    header.extend_from_slice(MAGIC);
    header.push(FORMAT_VERSION);
    let mut encoder = DeflateEncoder::new(header, Compression::default());
    encoder.write_all(source.as_bytes())?;
    Ok(encoder.finish()?)
}

/// 解码为源码
pub fn decode(blob: &[u8]) -> BinderResult<String> {
    if blob.len() < HEADER_LEN || &blob[..MAGIC.len()] != MAGIC {
        return Err(BinderError::InvalidBytecode("missing JSXB header".into()));
    }
    let version = blob[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(BinderError::InvalidBytecode(format!(
            "unsupported format version {}",
            version
        )));
    }
    let mut source = String::new();
    DeflateDecoder::new(&blob[HEADER_LEN..])
        .read_to_string(&mut source)
        .map_err(|e| BinderError::InvalidBytecode(e.to_string()))?;
    Ok(source)
}

/// 是否带有打包格式的魔数
pub fn is_bytecode(blob: &[u8]) -> bool {
    blob.len() >= HEADER_LEN && &blob[..MAGIC.len()] == MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let source = "exports.default = class Foo extends host.Node {};\n".repeat(20);
        let blob = encode(&source).unwrap();
        assert!(is_bytecode(&blob));
        assert!(blob.len() < source.len());
        assert_eq!(decode(&blob).unwrap(), source);
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(
            decode(b"JSX"),
            Err(BinderError::InvalidBytecode(_))
        ));
        assert!(decode(b"XXXX\x01abc").is_err());
        assert!(decode(b"JSXB\x09abc").is_err());
    }
}
