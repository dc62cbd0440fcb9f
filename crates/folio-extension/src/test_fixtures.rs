//! Hand-assembled WASM binaries shared by tests.

/// `(module (func (export "factory") (result i32) i32.const 0))`
///
/// Extism treats the 0 as success; the module writes no output.
pub const FACTORY_RETURNS_NOTHING: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, // magic
    0x01, 0x00, 0x00, 0x00, // version
    0x01, 0x05, // type section, 5 bytes
    0x01, 0x60, 0x00, 0x01, 0x7F, // 1 type: () -> i32
    0x03, 0x02, // function section, 2 bytes
    0x01, 0x00, // 1 function of type 0
    0x07, 0x0B, // export section, 11 bytes
    0x01, // 1 export
    0x07, b'f', b'a', b'c', b't', b'o', b'r', b'y', // name: "factory"
    0x00, 0x00, // function 0
    0x0A, 0x06, // code section, 6 bytes
    0x01, 0x04, // 1 body, 4 bytes
    0x00, // no locals
    0x41, 0x00, // i32.const 0
    0x0B, // end
];

/// Magic and version only: valid, but exports nothing.
pub const EMPTY_MODULE: &[u8] = &[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

/// Imports `func` from the `evil` namespace.
pub const FORBIDDEN_IMPORT: &[u8] = &[
    0x00, 0x61, 0x73, 0x6D, // magic
    0x01, 0x00, 0x00, 0x00, // version
    0x02, 0x0D, // import section, 13 bytes
    0x01, // 1 import
    0x04, b'e', b'v', b'i', b'l', // module: "evil"
    0x04, b'f', b'u', b'n', b'c', // name: "func"
    0x00, 0x00, // function, type index 0
];
