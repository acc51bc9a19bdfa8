//! Base64 encoders under the `base64.` namespace.

use base64::{Engine, engine::general_purpose};

use crate::{
    error::RuntimeError,
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_string},
    types::CelType,
    value::Value,
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::{Bytes, String as Str};

    registry.add(
        FunctionDecl::new("base64.encode").overload(
            Overload::global("base64_encode_bytes", vec![Bytes], Str).with_impl(|a| match &a[0] {
                Value::Bytes(b) => Ok(Value::string(general_purpose::STANDARD.encode(b))),
                other => Err(RuntimeError::type_mismatch(format!(
                    "expected bytes, found {}",
                    other.type_name()
                ))),
            }),
        ),
    );

    registry.add(
        FunctionDecl::new("base64.decode").overload(
            Overload::global("base64_decode_string", vec![Str], Bytes).with_impl(|a| {
                let encoded = want_string(&a[0])?;
                // Accept both padded and unpadded input.
                general_purpose::STANDARD
                    .decode(encoded)
                    .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(encoded))
                    .map(Value::bytes)
                    .map_err(|e| RuntimeError::conversion(format!("invalid base64: {e}")))
            }),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::dispatch;

    #[test]
    fn round_trip() {
        let registry = {
            let mut r = FunctionRegistry::empty();
            register(&mut r);
            r
        };
        let encode = &registry.find("base64.encode").unwrap().overloads;
        let decode = &registry.find("base64.decode").unwrap().overloads;
        let encoded = dispatch("base64.encode", encode, &[Value::bytes(b"hello".to_vec())]);
        assert!(matches!(&encoded, Value::String(s) if s.as_ref() == "aGVsbG8="));
        let decoded = dispatch("base64.decode", decode, &[encoded]);
        assert!(matches!(&decoded, Value::Bytes(b) if b.as_ref() == b"hello"));
        // Unpadded input decodes too.
        let decoded = dispatch("base64.decode", decode, &[Value::from("aGVsbG8")]);
        assert!(matches!(&decoded, Value::Bytes(b) if b.as_ref() == b"hello"));
    }
}
