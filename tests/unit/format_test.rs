//! Tests for format selectors

use roaring_offload::codec::{FileFormat, FormatSelector, SerializationFormat, TextStyle};
use roaring_offload::core::TaskError;

#[test]
fn test_selector_strings() {
    let names: Vec<&str> = SerializationFormat::ALL.iter().map(|f| f.as_str()).collect();
    assert_eq!(
        names,
        ["croaring", "portable", "unsafe_frozen_croaring", "unsafe_frozen_portable"]
    );
}

#[test]
fn test_frozen_formats() {
    assert!(SerializationFormat::UnsafeFrozenNative.is_frozen());
    assert!(SerializationFormat::UnsafeFrozenPortable.is_frozen());
    assert!(!SerializationFormat::Croaring.is_frozen());
    assert_eq!(SerializationFormat::UnsafeFrozenNative.alignment(), 32);
    assert_eq!(SerializationFormat::UnsafeFrozenPortable.alignment(), 1);
}

#[test]
fn test_selector_resolution() {
    assert_eq!(
        FormatSelector::from("unsafe_frozen_portable").resolve(),
        Ok(SerializationFormat::UnsafeFrozenPortable)
    );
    assert_eq!(FormatSelector::from(true).resolve(), Ok(SerializationFormat::Portable));
    assert!(matches!(
        FormatSelector::from("CROARING").resolve(),
        Err(TaskError::Argument(_))
    ));
}

#[test]
fn test_serde_names_match_selectors() {
    for format in SerializationFormat::ALL {
        let json = serde_json::to_string(&format).unwrap();
        assert_eq!(json, format!("\"{}\"", format.as_str()));
    }
    for style in TextStyle::ALL {
        let json = serde_json::to_string(&style).unwrap();
        assert_eq!(json, format!("\"{}\"", style.as_str()));
    }
}

#[test]
fn test_file_format_parsing() {
    assert_eq!(
        "tab_separated_values".parse::<FileFormat>(),
        Ok(FileFormat::Text(TextStyle::TabSeparated))
    );
    assert_eq!(
        "unsafe_frozen_croaring".parse::<FileFormat>(),
        Ok(FileFormat::Binary(SerializationFormat::UnsafeFrozenNative))
    );
    assert!(matches!("csv".parse::<FileFormat>(), Err(TaskError::Argument(_))));
}
