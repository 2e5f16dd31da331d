use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_repl::{
    config::Signals,
    connection::Connection,
    events::State,
    mock::MockDevice,
};

mod common;
use common::*;

/// Play the device's part of a completion request.
/// The device echoes what was typed, with `completion` in place of the tab.
async fn complete(device: &mut MockDevice, expected_prefix: &str, completion: &str) -> std::io::Result<()> {
    let signals = Signals::default();

    device.answer_interrupt().await?;

    let typed = device.read_until(&signals.completion_end).await?;
    assert_eq!(typed, format!("{expected_prefix}\t"));

    device.emit(expected_prefix).await?;
    device.emit(completion).await?;
    device.emit(&signals.completion_end).await?;

    // The typed line is thrown away.
    device.answer_interrupt().await
}

#[tokio::test]
async fn single_completion() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("single-completion").await?;

    let (completions, answered) = tokio::join!(
        session.completions("pri"),
        complete(&mut device, "pri", "nt(")
    );
    answered?;

    assert_eq!(completions?, vec!["print(".to_string()]);
    assert_eq!(session.state(), State::Free);

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn several_completions() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("several-completions").await?;

    let (completions, answered) = tokio::join!(
        session.completions("a"),
        complete(
            &mut device,
            "a",
            "\r\nabs             all             any\r\nascii\r\n>>> a"
        )
    );
    answered?;

    assert_eq!(completions?, vec!["abs", "all", "any", "ascii"]);

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn no_completions() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("no-completions").await?;

    let (completions, answered) = tokio::join!(
        session.completions("xyz"),
        complete(&mut device, "xyz", "")
    );
    answered?;

    assert_eq!(completions?, Vec::<String>::new());

    session.disconnect().await;

    Ok(())
}
