#![no_main]

use herald::{
    protocol::{render_push, Response},
    pubsub::validate_topic,
    DecoderChain, Message, OutputFormat, Request,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let chain = DecoderChain::standard(1024);

    match chain.decode_bytes(data) {
        Ok(Request::Publish { topic, content }) if validate_topic(&topic).is_ok() => {
            // Любое принятое брокером сообщение должно рендериться в одну строку.
            let message = Message::new(topic, content, 1);
            for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Xml] {
                let line = render_push(&message, format);
                assert!(!line.contains('\n'), "push spans lines: {line:?}");
            }
        }
        Ok(_) => {}
        Err(e) => {
            let line = Response::from_error(&e).encode();
            assert_eq!(line.matches('\n').count(), 1);
        }
    }
});
