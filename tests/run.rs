use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_repl::{
    command::Injection,
    config::Signals,
    connection::Connection,
    error::Error,
    events::{ErrorMessage, OutputEvent, State, Transcript},
    mock::BANNER,
};

mod common;
use common::*;

#[tokio::test]
async fn flash_prints_result() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("flash-prints-result").await?;

    let (output, code) = tokio::join!(session.flash("print(1+1)"), async {
        let code = device.expect_flash().await?;
        device.start().await?;

        Ok::<_, std::io::Error>(code)
    });

    assert_eq!(code?, "print(1+1)");
    let output = output?;
    assert_eq!(session.state(), State::Busy);

    device.emit("2\r\n").await?;
    device.done().await?;
    device.emit(BANNER).await?;
    device.prompt().await?;

    let events = collect(output).await?;

    assert_eq!(last_output(&events), Some("2\r\n"));
    assert!(errors(&events).is_empty());
    assert_eq!(session.state(), State::Free);

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn execute_multiline_code() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("execute-multiline").await?;

    let program = "for i in range(3):\n    print('it\\'s', i)";

    let (output, code) = tokio::join!(session.execute(program), async {
        let code = device.expect_execute().await?;
        device.start().await?;

        Ok::<_, std::io::Error>(code)
    });

    assert_eq!(code?, program);

    device.emit("it's 0\r\nit's 1\r\nit's 2\r\n").await?;
    device.done().await?;
    device.prompt().await?;

    let events = collect(output?).await?;

    assert_eq!(last_output(&events), Some("it's 0\r\nit's 1\r\nit's 2\r\n"));
    assert!(errors(&events).is_empty());

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn reboot_runs_entry_point() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("reboot").await?;

    let (output, rebooted) = tokio::join!(session.reboot(), async {
        device.expect_reboot().await?;
        device.start().await
    });
    rebooted?;

    device.emit("hello again\r\n").await?;
    device.done().await?;

    let events = collect(output?).await?;
    assert_eq!(last_output(&events), Some("hello again\r\n"));

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn runtime_error_is_reported_once() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("runtime-error").await?;

    let (output, started) = tokio::join!(session.flash("prit(1)"), async {
        device.expect_flash().await?;
        device.start().await
    });
    started?;

    device
        .traceback(Injection::Flash, 0, "NameError: name 'prit' isn't defined")
        .await?;
    device.emit(BANNER).await?;
    device.prompt().await?;

    let events = collect(output?).await?;

    assert_eq!(
        errors(&events),
        vec![&ErrorMessage {
            line: Some(0),
            exception_type: "NameError".into(),
            message: "name 'prit' isn't defined".into(),
        }]
    );
    assert_eq!(last_output(&events), None);
    assert_eq!(session.state(), State::Free);

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn syntax_error_before_start() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("syntax-error").await?;
    let signals = Signals::default();

    let (output, answered) = tokio::join!(session.execute("x = (\n\n"), async {
        device.expect_execute().await?;
        device
            .emit(&format!(
                "{}3\r\nSyntaxError: invalid syntax\r\n",
                signals.exec_traceback
            ))
            .await?;
        device.prompt().await
    });
    answered?;

    let events = collect(output?).await?;

    assert_eq!(
        events,
        vec![OutputEvent::ErrorMessage(ErrorMessage {
            line: Some(1),
            exception_type: "SyntaxError".into(),
            message: "invalid syntax".into(),
        })]
    );

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn reset_pressed_while_running() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("reset-pressed").await?;

    let (output, started) = tokio::join!(session.flash("print('tick')"), async {
        device.expect_flash().await?;
        device.start().await
    });
    started?;

    device.emit("tick\r\n").await?;
    // The button.
    device.emit(BANNER).await?;
    device.start().await?;
    device.emit("tock\r\n").await?;
    device.done().await?;

    let events = collect(output?).await?;

    let reset = events
        .iter()
        .position(|event| event == &OutputEvent::ResetPressed)
        .expect("Reset should be reported");
    let tick = events
        .iter()
        .position(|event| event.as_output().map_or(false, |output| output.contains("tick")))
        .expect("Output before the reset");

    assert!(tick < reset);
    assert_eq!(last_output(&events), Some("tock\r\n"));
    assert!(errors(&events).is_empty());

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn busy_rejects_commands() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("busy-rejects").await?;

    let (output, started) = tokio::join!(session.flash("while True: pass"), async {
        device.expect_flash().await?;
        device.start().await
    });
    started?;
    let output = output?;

    assert_eq!(session.execute("1").await.err(), Some(Error::DeviceNotFree));
    assert_eq!(session.flash("1").await.err(), Some(Error::DeviceNotFree));
    assert_eq!(session.reboot().await.err(), Some(Error::DeviceNotFree));
    assert_eq!(session.completions("a").await, Err(Error::DeviceNotFree));
    assert_eq!(session.state(), State::Busy);

    // The running command is unaffected.
    device.emit("still here\r\n").await?;
    device.done().await?;

    let events = collect(output).await?;
    assert_eq!(last_output(&events), Some("still here\r\n"));
    assert!(errors(&events).is_empty());

    // And free again.
    let (output, started) = tokio::join!(session.execute("print(3)"), async {
        device.expect_execute().await?;
        device.start().await?;
        device.emit("3\r\n").await?;
        device.done().await
    });
    started?;

    let events = collect(output?).await?;
    assert_eq!(last_output(&events), Some("3\r\n"));

    session.disconnect().await;

    Ok(())
}

#[tokio::test]
async fn long_output_streams() -> Result<()> {
    let (Connection { session, .. }, mut device) = connected("long-output").await?;

    let (output, started) = tokio::join!(session.execute("print(lipsum)"), async {
        device.expect_execute().await?;
        device.start().await
    });
    started?;
    let output = output?;

    let text = lipsum::lipsum(2000);
    let lines = text
        .split_inclusive(". ")
        .map(|sentence| format!("{}\r\n", sentence.trim_end()))
        .collect::<Vec<_>>();

    for line in &lines {
        device.emit(line).await?;
    }
    device.done().await?;

    let events = collect(output).await?;

    let last_line = lines.last().expect("Lipsum has sentences");
    assert!(last_output(&events).is_some_and(|output| output.ends_with(last_line.as_str())));

    // Only recent output is kept around.
    assert!(last_output(&events).is_some_and(|output| output.len() < text.len()));

    let mut transcript = Transcript::new();
    let mut shown = String::new();
    for event in &events {
        if let Some((output, end)) = event.as_snapshot() {
            shown.push_str(transcript.push(output, end));
        }
    }
    assert!(shown.ends_with(last_line.as_str()));

    session.disconnect().await;

    Ok(())
}
