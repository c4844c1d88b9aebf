//! Integration-Tests fuer Wiederverbindung und Ticket-Erneuerung

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use common::{Umgebung, ZaehlIssuer};
use klingel_core::{ConnectionState, LiveViewError, TransportZustand};
use klingel_protocol::{Methode, SignalingMessage};
use klingel_signaling::SessionOptions;

#[tokio::test(start_paused = true)]
async fn abgelehnter_handshake_erneuert_ticket_genau_einmal() {
    let mut u = Umgebung::bauer().ablehnungen(&[404]).bauen();
    let start = u.starten();

    let mut gs = u.naechste_verbindung().await;
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 2);
    assert_eq!(u.issuer.anzahl(), 2);
    assert!(gs.url.contains("token=ticket-2"));

    gs.aushandeln().await;
    start.await.unwrap().unwrap();
    assert_eq!(u.session.versuche(), 0);
    u.session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn nicht_bereit_wartet_auf_demselben_dialog() {
    let mut u = Umgebung::neu();
    let start = u.starten();

    let mut gs = u.naechste_verbindung().await;
    let dialog = gs.offer_erwarten().await;
    let t0 = Instant::now();
    for _ in 0..2 {
        gs.senden(SignalingMessage::close(dialog.clone(), Some(26), "not ready yet"))
            .await;
    }
    gs.antworten(&dialog).await;

    start.await.unwrap().unwrap();
    let gewartet = t0.elapsed();
    assert!(gewartet >= Duration::from_millis(600), "{gewartet:?}");
    assert!(gewartet < Duration::from_secs(2), "{gewartet:?}");

    // kein neuer Socket, kein neues Offer, kein Versuch angerechnet
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 1);
    assert!(u.verbindungen.try_recv().is_err());
    assert_eq!(u.medien.anzahl(), 1);
    assert_eq!(u.session.versuche(), 0);
    assert_eq!(u.issuer.anzahl(), 1, "Code 26 erneuert kein Ticket");

    let ping = gs.erwarten(Methode::Ping).await;
    assert_eq!(ping.dialog_id.as_ref(), Some(&dialog));
    u.session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn erschoepftes_nicht_bereit_zaehlt_als_versuch() {
    let mut optionen = SessionOptions::default();
    optionen.reconnect.max_nicht_bereit = 1;
    optionen.reconnect.max_versuche = 0;
    let mut u = Umgebung::bauer().optionen(optionen).bauen();
    let start = u.starten();

    let mut gs = u.naechste_verbindung().await;
    let dialog = gs.offer_erwarten().await;
    for _ in 0..2 {
        gs.senden(SignalingMessage::close(dialog.clone(), Some(26), "not ready yet"))
            .await;
    }

    assert_eq!(
        start.await.unwrap(),
        Err(LiveViewError::SessionUnrecoverable { attempts: 0 })
    );
    assert_eq!(*u.session.zustand().borrow(), ConnectionState::Failed);
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 1);
    assert!(u.medien.letzte().ist_geschlossen());
}

#[tokio::test(start_paused = true)]
async fn dauerhaft_abgelehnt_wird_unrecoverable() {
    let mut u = Umgebung::bauer().immer_ablehnen(503).bauen();
    let beginn = Instant::now();

    let ergebnis = u.session.start().await;
    assert_eq!(
        ergebnis,
        Err(LiveViewError::SessionUnrecoverable { attempts: 3 })
    );
    assert_eq!(*u.session.zustand().borrow(), ConnectionState::Failed);
    // vier Versuche mit je einem Zusatzversuch nach Ticket-Erneuerung
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 8);
    // Backoff 2 s + 4 s + 8 s
    assert!(beginn.elapsed() >= Duration::from_secs(14));
    assert!(u.verbindungen.try_recv().is_err());
    assert_eq!(
        u.session.wait_finished().await,
        Err(LiveViewError::SessionUnrecoverable { attempts: 3 })
    );

    // keine weiteren Versuche
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn abgelehntes_konto_ohne_wiederholung() {
    let u = Umgebung::bauer().issuer(ZaehlIssuer::ablehnend()).bauen();

    let ergebnis = u.session.start().await;
    assert!(matches!(ergebnis, Err(LiveViewError::AuthFailure(_))));
    assert_eq!(*u.session.zustand().borrow(), ConnectionState::Failed);
    assert_eq!(u.connector.versuche.load(Ordering::SeqCst), 0);
    assert_eq!(u.issuer.anzahl(), 1);
}

#[tokio::test(start_paused = true)]
async fn gescheiterter_transport_fuehrt_zu_neuverbindung() {
    let mut u = Umgebung::neu();
    let start = u.starten();
    let mut erste = u.naechste_verbindung().await;
    erste.aushandeln().await;
    start.await.unwrap().unwrap();

    let t0 = Instant::now();
    u.medien.letzte().transport_setzen(TransportZustand::Fehlgeschlagen);

    let mut zweite = u.naechste_verbindung().await;
    // drei Keepalive-Intervalle, dann Backoff
    assert!(t0.elapsed() >= Duration::from_secs(15), "{:?}", t0.elapsed());
    assert_eq!(u.session.versuche(), 1);
    assert_eq!(u.issuer.anzahl(), 2, "Ticket wird vor dem Versuch erneuert");
    assert!(zweite.url.contains("token=ticket-2"));
    assert!(u.medien.engines.lock()[0].ist_geschlossen());

    zweite.aushandeln().await;
    let mut zustand = u.session.zustand();
    zustand
        .wait_for(|z| *z == ConnectionState::Active)
        .await
        .unwrap();
    assert_eq!(u.session.versuche(), 0);

    u.session.stop().await;
    assert_eq!(*u.session.zustand().borrow(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn socket_ende_im_betrieb_fuehrt_zu_neuverbindung() {
    let mut u = Umgebung::neu();
    let start = u.starten();
    let mut erste = u.naechste_verbindung().await;
    erste.aushandeln().await;
    start.await.unwrap().unwrap();

    let mut zustand = u.session.zustand();
    drop(erste);

    zustand
        .wait_for(|z| *z == ConnectionState::Degraded)
        .await
        .unwrap();
    let mut zweite = u.naechste_verbindung().await;
    assert_eq!(u.session.versuche(), 1);
    zweite.aushandeln().await;
    zustand
        .wait_for(|z| *z == ConnectionState::Active)
        .await
        .unwrap();

    u.session.stop().await;
}

#[tokio::test(start_paused = true)]
async fn remote_close_im_betrieb_wird_gemeldet_und_wiederholt() {
    let mut u = Umgebung::neu();
    let start = u.starten();
    let mut erste = u.naechste_verbindung().await;
    let dialog = erste.aushandeln().await;
    start.await.unwrap().unwrap();

    erste
        .senden(SignalingMessage::close(dialog, Some(7), "camera busy"))
        .await;

    let mut zweite = u.naechste_verbindung().await;
    assert_eq!(u.session.versuche(), 1);
    zweite.aushandeln().await;
    let mut zustand = u.session.zustand();
    zustand
        .wait_for(|z| *z == ConnectionState::Active)
        .await
        .unwrap();
    u.session.stop().await;
}
