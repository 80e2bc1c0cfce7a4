use aes::cipher::{
    BlockDecryptMut, BlockEncryptMut, Iv, IvSizeUser, Key, KeyIvInit, KeySizeUser,
    block_padding::Iso7816,
    typenum::{U16, U32},
};
use bytes::{Bytes, BytesMut};
use generic_array::GenericArray;
use k256::{
    PublicKey, SecretKey,
    ecdh::SharedSecret,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::hazmat::{PrehashSigner, PrehashVerifier},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

use crate::{Error, Result};

pub type Salt = GenericArray<u8, U32>;
pub type Cryptogram = GenericArray<u8, U32>;
pub type Challenge = GenericArray<u8, U32>;
pub(crate) type ApduMeta = GenericArray<u8, U16>;

type Encryptor = cbc::Encryptor<aes::Aes256>;
type Decryptor = cbc::Decryptor<aes::Aes256>;

/// Key and IV sizes of the phonon secure channel (AES-256-CBC)
pub struct PhononScp;

impl KeySizeUser for PhononScp {
    type KeySize = U32;
}

impl IvSizeUser for PhononScp {
    type IvSize = U16;
}

pub fn generate_ecdh_shared_secret(private: &SecretKey, public: &PublicKey) -> SharedSecret {
    k256::elliptic_curve::ecdh::diffie_hellman(private.to_nonzero_scalar(), public.as_affine())
}

/// Random 32 byte salt, challenge or nonce.
pub fn random_salt() -> Salt {
    let mut salt = Salt::default();
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// SHA-256 over the concatenation of `parts`.
pub(crate) fn calculate_cryptogram(parts: &[&[u8]]) -> Cryptogram {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Secret both sides of a terminal pairing derive from the client salt:
/// `sha256(client_salt || ecdh)`.
pub(crate) fn secret_hash(client_salt: &Salt, secret: &SharedSecret) -> Cryptogram {
    calculate_cryptogram(&[client_salt.as_slice(), secret.raw_secret_bytes().as_slice()])
}

/// Perform one-shot encryption using the provided public key and ECDH shared secret.
/// Used for encrypting initialisation data (PIN and pairing token).
///
/// The output is `len(pubkey) || pubkey || iv || ciphertext`.
pub(crate) fn one_shot_encrypt(
    public_key: &PublicKey,
    ecdh_shared_secret: &SharedSecret,
    data: &mut BytesMut,
) -> Result<Bytes> {
    let mut iv = Iv::<PhononScp>::default();
    rand::rng().fill_bytes(&mut iv);

    let msg_len = prepare_padding(data);
    let ciphertext = Encryptor::new(ecdh_shared_secret.raw_secret_bytes(), &iv)
        .encrypt_padded_mut::<Iso7816>(data, msg_len)?;

    let pub_key_data = public_key.to_encoded_point(false);
    let mut buf = BytesMut::new();
    buf.extend(&[pub_key_data.len() as u8]);
    buf.extend(pub_key_data.as_bytes());
    buf.extend(&iv);
    buf.extend(ciphertext);

    Ok(buf.into())
}

/// Reverse of [`one_shot_encrypt`], run on the card side with its identity key.
pub(crate) fn one_shot_decrypt(private_key: &SecretKey, data: &[u8]) -> Result<Bytes> {
    let (&key_len, rest) = data
        .split_first()
        .ok_or(Error::InvalidData("empty one-shot payload"))?;
    let key_len = key_len as usize;
    if rest.len() < key_len + 16 {
        return Err(Error::InvalidResponseLength {
            expected: key_len + 17,
            actual: data.len(),
        });
    }

    let (public_key, rest) = rest.split_at(key_len);
    let (iv, ciphertext) = rest.split_at(16);
    let public_key = PublicKey::from_sec1_bytes(public_key)?;
    let secret = generate_ecdh_shared_secret(private_key, &public_key);

    decrypt_data(
        &mut BytesMut::from(ciphertext),
        secret.raw_secret_bytes(),
        Iv::<PhononScp>::from_slice(iv),
    )
}

/// Derive terminal session keys from the ECDH secret, pairing key, and the
/// salt returned by OPEN_SECURE_CHANNEL.
///
/// (K(E) | K(M)) = H(shared_secret | pairing_key | salt)
pub(crate) fn derive_session_keys(
    secret: &SharedSecret,
    pairing_key: &Key<PhononScp>,
    salt: &Salt,
) -> (Key<PhononScp>, Key<PhononScp>) {
    let mut hasher = Sha512::new();
    hasher.update(secret.raw_secret_bytes());
    hasher.update(pairing_key);
    hasher.update(salt);
    split_session_keys(&hasher.finalize())
}

/// Derive card to card session keys.
///
/// (K(E) | K(M)) = H(sender_salt | receiver_salt | shared_secret)
pub(crate) fn derive_card_session_keys(
    sender_salt: &[u8],
    receiver_salt: &[u8],
    secret: &SharedSecret,
) -> (Key<PhononScp>, Key<PhononScp>) {
    let mut hasher = Sha512::new();
    hasher.update(sender_salt);
    hasher.update(receiver_salt);
    hasher.update(secret.raw_secret_bytes());
    split_session_keys(&hasher.finalize())
}

fn split_session_keys(data: &[u8]) -> (Key<PhononScp>, Key<PhononScp>) {
    let enc_key = Key::<PhononScp>::clone_from_slice(&data[0..32]);
    let mac_key = Key::<PhononScp>::clone_from_slice(&data[32..64]);
    (enc_key, mac_key)
}

/// Cryptogram both cards sign at the end of card pairing:
/// `sha256(enc_key || mac_key || iv)`.
pub(crate) fn card_pairing_cryptogram(
    enc_key: &Key<PhononScp>,
    mac_key: &Key<PhononScp>,
    iv: &Iv<PhononScp>,
) -> Cryptogram {
    calculate_cryptogram(&[enc_key.as_slice(), mac_key.as_slice(), iv.as_slice()])
}

/// Encrypt data using the provided key and IV, padding it in ISO 7816 format.
pub(crate) fn encrypt_data(
    data: &mut BytesMut,
    enc_key: &Key<PhononScp>,
    iv: &Iv<PhononScp>,
) -> Result<Bytes> {
    let msg_len = prepare_padding(data);
    let encrypted = Encryptor::new(enc_key, iv).encrypt_padded_mut::<Iso7816>(data, msg_len)?;
    Ok(Bytes::copy_from_slice(encrypted))
}

/// Decrypt data using the provided key and IV assuming the data is padded in ISO 7816 format.
pub(crate) fn decrypt_data(
    data: &mut BytesMut,
    enc_key: &Key<PhononScp>,
    iv: &Iv<PhononScp>,
) -> Result<Bytes> {
    let decrypted = Decryptor::new(enc_key, iv).decrypt_padded_mut::<Iso7816>(data)?;
    Ok(Bytes::copy_from_slice(decrypted))
}

/// Calculate the MAC for the given data.
///
/// `meta || data` is padded and CBC encrypted under `mac_key` with a zero IV.
/// The MAC is the second to last ciphertext block.
pub(crate) fn calculate_mac(
    meta: &ApduMeta,
    data: &[u8],
    mac_key: &Key<PhononScp>,
) -> Result<Iv<PhononScp>> {
    let iv = Iv::<PhononScp>::default();

    let mut buf = BytesMut::with_capacity(meta.len() + data.len() + 16);
    buf.extend_from_slice(meta.as_slice());
    buf.extend_from_slice(data);

    let msg_len = prepare_padding(&mut buf);
    let ciphertext =
        Encryptor::new(mac_key, &iv).encrypt_padded_mut::<Iso7816>(&mut buf, msg_len)?;

    Ok(*Iv::<PhononScp>::from_slice(
        &ciphertext[ciphertext.len() - 32..ciphertext.len() - 16],
    ))
}

/// Sign a 32 byte digest and return the DER encoding.
pub(crate) fn sign_prehash_der(key: &SigningKey, digest: &[u8]) -> Result<Bytes> {
    let signature: Signature = key.sign_prehash(digest)?;
    Ok(Bytes::copy_from_slice(signature.to_der().as_bytes()))
}

/// Verify a DER signature over a 32 byte digest.
///
/// High-S signatures are normalized first; k256 only accepts the low-S form.
pub(crate) fn verify_prehash_der(
    public_key: &PublicKey,
    digest: &[u8],
    signature: &[u8],
) -> Result<()> {
    let signature = Signature::from_der(signature)?;
    let signature = signature.normalize_s().unwrap_or(signature);
    VerifyingKey::from(public_key)
        .verify_prehash(digest, &signature)
        .map_err(|_| Error::InvalidSignature)
}

// A utility function to ensure that the data is padded to a multiple of 16 bytes.
fn prepare_padding(data: &mut BytesMut) -> usize {
    let len = data.len();
    data.resize(len + 16 - len % 16, 0);

    len
}
